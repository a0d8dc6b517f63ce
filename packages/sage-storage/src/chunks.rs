use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{ChunkHit, ChunkRow},
	vector,
};

pub async fn delete_document_chunks<'e, E>(
	executor: E,
	session_id: &str,
	document_id: &str,
) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM chunks WHERE session_id = $1 AND document_id = $2")
		.bind(session_id)
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn insert_chunk<'e, E>(executor: E, chunk: &ChunkRow, embedding: &[f32]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	vector::check_finite(embedding)?;

	let result = sqlx::query(
		"\
INSERT INTO chunks (
\tchunk_id,
\tsession_id,
\tdocument_id,
\tordinal_index,
\ttext,
\tcontext_prefix,
\tsource_file_name,
\tembedding_model_id,
\tembedding,
\toverlap_flags,
\tcreated_at,
\tupdated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9::text::vector,$10,$11,$12)
ON CONFLICT (session_id, document_id, ordinal_index) DO NOTHING",
	)
	.bind(chunk.chunk_id)
	.bind(chunk.session_id.as_str())
	.bind(chunk.document_id.as_str())
	.bind(chunk.ordinal_index)
	.bind(chunk.text.as_str())
	.bind(chunk.context_prefix.as_str())
	.bind(chunk.source_file_name.as_str())
	.bind(chunk.embedding_model_id.as_str())
	.bind(vector::vector_to_pg(embedding))
	.bind(&chunk.overlap_flags)
	.bind(chunk.created_at)
	.bind(chunk.updated_at)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::Conflict(format!(
			"Chunk ordinal {} already exists for document {}.",
			chunk.ordinal_index, chunk.document_id
		)));
	}

	Ok(())
}

pub async fn get_chunk<'e, E>(executor: E, chunk_id: Uuid) -> Result<Option<ChunkRow>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, ChunkRow>(
		"\
SELECT
\tchunk_id,
\tsession_id,
\tdocument_id,
\tordinal_index,
\ttext,
\tcontext_prefix,
\tsource_file_name,
\tembedding_model_id,
\toverlap_flags,
\tcreated_at,
\tupdated_at
FROM chunks
WHERE chunk_id = $1",
	)
	.bind(chunk_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn list_document_chunks<'e, E>(
	executor: E,
	session_id: &str,
	document_id: &str,
) -> Result<Vec<ChunkRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ChunkRow>(
		"\
SELECT
\tchunk_id,
\tsession_id,
\tdocument_id,
\tordinal_index,
\ttext,
\tcontext_prefix,
\tsource_file_name,
\tembedding_model_id,
\toverlap_flags,
\tcreated_at,
\tupdated_at
FROM chunks
WHERE session_id = $1 AND document_id = $2
ORDER BY ordinal_index ASC",
	)
	.bind(session_id)
	.bind(document_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Replaces the text and vector of one chunk and clears its overlap flags.
pub async fn rewrite_chunk<'e, E>(
	executor: E,
	chunk_id: Uuid,
	text: &str,
	context_prefix: &str,
	embedding: &[f32],
	embedding_model_id: &str,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	vector::check_finite(embedding)?;

	let result = sqlx::query(
		"\
UPDATE chunks
SET
\ttext = $2,
\tcontext_prefix = $3,
\tembedding = $4::text::vector,
\tembedding_model_id = $5,
\toverlap_flags = '{}',
\tupdated_at = $6
WHERE chunk_id = $1",
	)
	.bind(chunk_id)
	.bind(text)
	.bind(context_prefix)
	.bind(vector::vector_to_pg(embedding))
	.bind(embedding_model_id)
	.bind(now)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("Chunk {chunk_id} does not exist.")));
	}

	Ok(())
}

pub async fn set_overlap_flags<'e, E>(
	executor: E,
	chunk_id: Uuid,
	flags: &[String],
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE chunks SET overlap_flags = $2, updated_at = $3 WHERE chunk_id = $1")
		.bind(chunk_id)
		.bind(flags)
		.bind(now)
		.execute(executor)
		.await?;

	Ok(())
}

/// Nearest chunks of one session by cosine distance. Only chunks embedded with
/// `embedding_model_id` take part, so vectors from another model never fill the limit.
pub async fn search_chunks<'e, E>(
	executor: E,
	session_id: &str,
	embedding_model_id: &str,
	embedding: &[f32],
	limit: i64,
) -> Result<Vec<ChunkHit>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ChunkHit>(
		"\
SELECT
\tchunk_id,
\tdocument_id,
\tordinal_index,
\ttext,
\tsource_file_name,
\tembedding_model_id,
\t(embedding <=> $3::text::vector)::float8 AS distance
FROM chunks
WHERE session_id = $1 AND embedding_model_id = $2
ORDER BY distance ASC, chunk_id ASC
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

/// Chunks of one session whose vectors come from a model other than `embedding_model_id`.
pub async fn count_stale_chunks<'e, E>(
	executor: E,
	session_id: &str,
	embedding_model_id: &str,
) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let count: i64 = sqlx::query_scalar(
		"SELECT count(*) FROM chunks WHERE session_id = $1 AND embedding_model_id <> $2",
	)
	.bind(session_id)
	.bind(embedding_model_id)
	.fetch_one(executor)
	.await?;

	Ok(count)
}
