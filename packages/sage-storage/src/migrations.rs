//! Ordered, numbered schema migrations.
//!
//! Each migration runs once per database and is recorded in `schema_migrations`. The statements
//! themselves are written to be re-runnable so a half-applied upgrade can be retried.

use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;

use crate::Result;

const LOCK_ID: i64 = 5_124_007;

pub struct Migration {
	pub version: i32,
	pub name: &'static str,
	sql: &'static str,
}
impl Migration {
	pub fn render(&self, vector_dim: u32) -> String {
		self.sql.replace("<VECTOR_DIM>", &vector_dim.to_string())
	}
}

pub const MIGRATIONS: &[Migration] = &[
	Migration { version: 1, name: "extensions", sql: include_str!("../sql/001_extensions.sql") },
	Migration { version: 2, name: "chunks", sql: include_str!("../sql/002_chunks.sql") },
	Migration {
		version: 3,
		name: "knowledge_base",
		sql: include_str!("../sql/003_knowledge_base.sql"),
	},
	Migration { version: 4, name: "qa_pairs", sql: include_str!("../sql/004_qa_pairs.sql") },
	Migration {
		version: 5,
		name: "comprehension",
		sql: include_str!("../sql/005_comprehension.sql"),
	},
];

/// Applies every pending migration in version order. Returns the versions applied by this call.
pub async fn apply(pool: &PgPool, vector_dim: u32) -> Result<Vec<i32>> {
	// Advisory locks are held per connection. A single transaction scopes the lock to one
	// connection and releases it on commit.
	let mut tx = pool.begin().await?;

	sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(LOCK_ID).execute(&mut *tx).await?;
	sqlx::query(
		"\
CREATE TABLE IF NOT EXISTS schema_migrations (
\tversion integer PRIMARY KEY,
\tname text NOT NULL,
\tapplied_at timestamptz NOT NULL
)",
	)
	.execute(&mut *tx)
	.await?;

	let applied: Vec<i32> =
		sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
			.fetch_all(&mut *tx)
			.await?;
	let mut newly_applied = Vec::new();

	for migration in MIGRATIONS {
		if applied.contains(&migration.version) {
			continue;
		}

		run_statements(&mut tx, &migration.render(vector_dim)).await?;

		sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES ($1, $2, $3)")
			.bind(migration.version)
			.bind(migration.name)
			.bind(OffsetDateTime::now_utc())
			.execute(&mut *tx)
			.await?;

		tracing::info!(version = migration.version, name = migration.name, "Applied migration.");

		newly_applied.push(migration.version);
	}

	tx.commit().await?;

	Ok(newly_applied)
}

async fn run_statements(conn: &mut PgConnection, sql: &str) -> Result<()> {
	for statement in sql.split(';') {
		let trimmed = statement.trim();

		if trimmed.is_empty() {
			continue;
		}

		sqlx::query(trimmed).execute(&mut *conn).await?;
	}

	Ok(())
}
