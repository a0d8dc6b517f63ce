use sqlx::PgExecutor;

use crate::{
	Result,
	models::{QaHit, QaPairRow},
	vector,
};

/// Inserts a pair, or replaces the answer and vector of an existing pair with the same question.
pub async fn upsert_pair<'e, E>(executor: E, pair: &QaPairRow, embedding: &[f32]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	vector::check_finite(embedding)?;

	sqlx::query(
		"\
INSERT INTO qa_pairs (
\tqa_id,
\tsession_id,
\tquestion,
\tquestion_hash,
\tanswer,
\tembedding_model_id,
\tembedding,
\tcreated_at,
\tupdated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7::text::vector,$8,$9)
ON CONFLICT (session_id, question_hash) DO UPDATE
SET
\tanswer = EXCLUDED.answer,
\tembedding_model_id = EXCLUDED.embedding_model_id,
\tembedding = EXCLUDED.embedding,
\tupdated_at = EXCLUDED.updated_at",
	)
	.bind(pair.qa_id)
	.bind(pair.session_id.as_str())
	.bind(pair.question.as_str())
	.bind(pair.question_hash.as_str())
	.bind(pair.answer.as_str())
	.bind(pair.embedding_model_id.as_str())
	.bind(vector::vector_to_pg(embedding))
	.bind(pair.created_at)
	.bind(pair.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Cached pairs across all sessions embedded with `embedding_model_id`, nearest first.
pub async fn search_pairs<'e, E>(
	executor: E,
	embedding_model_id: &str,
	embedding: &[f32],
	limit: i64,
) -> Result<Vec<QaHit>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, QaHit>(
		"\
SELECT
\tqa_id,
\tquestion,
\tanswer,
\tembedding_model_id,
\t(embedding <=> $2::text::vector)::float8 AS distance
FROM qa_pairs
WHERE embedding_model_id = $1
ORDER BY distance ASC, qa_id ASC
LIMIT $3",
	)
	.bind(embedding_model_id)
	.bind(vector::vector_to_pg(embedding))
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Cached pairs whose vectors come from a model other than `embedding_model_id`.
pub async fn count_stale_pairs<'e, E>(executor: E, embedding_model_id: &str) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let count: i64 =
		sqlx::query_scalar("SELECT count(*) FROM qa_pairs WHERE embedding_model_id <> $1")
			.bind(embedding_model_id)
			.fetch_one(executor)
			.await?;

	Ok(count)
}
