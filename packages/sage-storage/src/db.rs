use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Result, migrations};
use sage_config::Postgres;

pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self, vector_dim: u32) -> Result<()> {
		let applied = migrations::apply(&self.pool, vector_dim).await?;

		tracing::debug!(applied = applied.len(), "Schema is up to date.");

		Ok(())
	}
}
