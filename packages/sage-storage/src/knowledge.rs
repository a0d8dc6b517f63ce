use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
	Result,
	models::{KnowledgeEntryRow, KnowledgeHit},
	vector,
};

pub async fn insert_entry<'e, E>(
	executor: E,
	entry: &KnowledgeEntryRow,
	embedding: &[f32],
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	vector::check_finite(embedding)?;

	sqlx::query(
		"\
INSERT INTO kb_entries (
\tentry_id,
\tsession_id,
\ttopic,
\tcontent,
\tembedding_model_id,
\tembedding,
\tcreated_at
)
VALUES ($1,$2,$3,$4,$5,$6::text::vector,$7)",
	)
	.bind(entry.entry_id)
	.bind(entry.session_id.as_str())
	.bind(entry.topic.as_str())
	.bind(entry.content.as_str())
	.bind(entry.embedding_model_id.as_str())
	.bind(vector::vector_to_pg(embedding))
	.bind(entry.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Semantic lookup over entries embedded with `embedding_model_id`. `distance` is the cosine
/// distance to `embedding`.
pub async fn search_by_vector<'e, E>(
	executor: E,
	session_id: &str,
	embedding_model_id: &str,
	embedding: &[f32],
	limit: i64,
) -> Result<Vec<KnowledgeHit>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, KnowledgeHit>(
		"\
SELECT
\tentry_id,
\ttopic,
\tcontent,
\tembedding_model_id,
\t(embedding <=> $3::text::vector)::float8 AS distance
FROM kb_entries
WHERE session_id = $1 AND embedding_model_id = $2
ORDER BY distance ASC, entry_id ASC
LIMIT $4",
	)
	.bind(session_id)
	.bind(embedding_model_id)
	.bind(vector::vector_to_pg(embedding))
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Keyword lookup over topic and content. Matching rows still carry their vector distance so the
/// caller can blend both signals.
pub async fn search_by_terms<'e, E>(
	executor: E,
	session_id: &str,
	embedding_model_id: &str,
	terms: &[String],
	embedding: &[f32],
	limit: i64,
) -> Result<Vec<KnowledgeHit>>
where
	E: PgExecutor<'e>,
{
	if terms.is_empty() {
		return Ok(Vec::new());
	}

	let patterns: Vec<String> = terms.iter().map(|term| format!("%{}%", escape_like(term))).collect();
	let rows = sqlx::query_as::<_, KnowledgeHit>(
		"\
SELECT
\tentry_id,
\ttopic,
\tcontent,
\tembedding_model_id,
\t(embedding <=> $4::text::vector)::float8 AS distance
FROM kb_entries
WHERE session_id = $1
\tAND embedding_model_id = $2
\tAND (topic ILIKE ANY($3) OR content ILIKE ANY($3))
ORDER BY created_at DESC, entry_id ASC
LIMIT $5",
	)
	.bind(session_id)
	.bind(embedding_model_id)
	.bind(&patterns)
	.bind(vector::vector_to_pg(embedding))
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Entries of one session whose vectors come from a model other than `embedding_model_id`.
pub async fn count_stale_entries<'e, E>(
	executor: E,
	session_id: &str,
	embedding_model_id: &str,
) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let count: i64 = sqlx::query_scalar(
		"SELECT count(*) FROM kb_entries WHERE session_id = $1 AND embedding_model_id <> $2",
	)
	.bind(session_id)
	.bind(embedding_model_id)
	.fetch_one(executor)
	.await?;

	Ok(count)
}

pub async fn get_entry<'e, E>(executor: E, entry_id: Uuid) -> Result<Option<KnowledgeEntryRow>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, KnowledgeEntryRow>(
		"\
SELECT entry_id, session_id, topic, content, embedding_model_id, created_at
FROM kb_entries
WHERE entry_id = $1",
	)
	.bind(entry_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

fn escape_like(term: &str) -> String {
	let mut out = String::with_capacity(term.len());

	for ch in term.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			out.push('\\');
		}

		out.push(ch);
	}

	out
}
