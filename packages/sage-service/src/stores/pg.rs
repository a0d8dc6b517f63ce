//! Postgres-backed stores. Vectors live in pgvector columns and distances come from `<=>`.

use std::sync::Arc;

use ahash::AHashSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	stores::{
		ChunkRecord, ChunkStore, ComprehensionStore, EventOutcome, InteractionRecord,
		KnowledgeRecord, KnowledgeStore, QaRecord, QaStore, RawScore, ScoredEventRecord,
		SourceHit, SourceHits, SourceQuery, StateMutator,
	},
};
use sage_config::Ebars;
use sage_domain::{ComprehensionState, DifficultyLevel, RatingAverage, level_for_score};
use sage_storage::{
	chunks, comprehension,
	db::Db,
	knowledge,
	models::{
		ChunkRow, ComprehensionRow, InteractionRow, KnowledgeEntryRow, KnowledgeHit, QaPairRow,
		ScoredEventRow,
	},
	qa,
};

pub struct PgStore {
	db: Arc<Db>,
	/// Levels are derived from the stored score with these thresholds on every load.
	ebars: Ebars,
}
impl PgStore {
	pub fn new(db: Arc<Db>, ebars: Ebars) -> Self {
		Self { db, ebars }
	}

	fn state_from_row(&self, row: ComprehensionRow) -> Result<ComprehensionState> {
		let difficulty_level = level_for_score(&self.ebars, row.comprehension_score);

		if DifficultyLevel::parse(&row.difficulty_level) != Some(difficulty_level) {
			tracing::debug!(
				stored = %row.difficulty_level,
				derived = difficulty_level.as_str(),
				"Stored difficulty level is outdated. Using the level derived from the score."
			);
		}

		Ok(ComprehensionState {
			user_id: row.user_id,
			session_id: row.session_id,
			comprehension_score: row.comprehension_score,
			difficulty_level,
			total_feedback_count: to_u32(row.total_feedback_count)?,
			understanding: RatingAverage {
				mean: row.average_understanding,
				samples: to_u32(row.understanding_samples)?,
			},
			satisfaction: RatingAverage {
				mean: row.average_satisfaction,
				samples: to_u32(row.satisfaction_samples)?,
			},
			last_updated: row.last_updated,
		})
	}
}
impl ChunkStore for PgStore {
	fn replace_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
		records: Vec<(ChunkRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;
			let removed =
				chunks::delete_document_chunks(&mut *tx, session_id, document_id).await?;

			for (chunk, embedding) in &records {
				chunks::insert_chunk(&mut *tx, &chunk_row(chunk), embedding).await?;
			}

			tx.commit().await?;

			tracing::debug!(
				session_id,
				document_id,
				removed,
				inserted = records.len(),
				"Document chunks replaced."
			);

			Ok(())
		})
	}

	fn list_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<ChunkRecord>>> {
		Box::pin(async move {
			let rows = chunks::list_document_chunks(&self.db.pool, session_id, document_id).await?;

			Ok(rows.into_iter().map(chunk_record).collect())
		})
	}

	fn get<'a>(&'a self, chunk_id: Uuid) -> BoxFuture<'a, Result<Option<ChunkRecord>>> {
		Box::pin(async move {
			let row = chunks::get_chunk(&self.db.pool, chunk_id).await?;

			Ok(row.map(chunk_record))
		})
	}

	fn rewrite<'a>(
		&'a self,
		chunk_id: Uuid,
		text: &'a str,
		context_prefix: &'a str,
		embedding: Vec<f32>,
		embedding_model_id: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			chunks::rewrite_chunk(
				&self.db.pool,
				chunk_id,
				text,
				context_prefix,
				&embedding,
				embedding_model_id,
				now,
			)
			.await?;

			Ok(())
		})
	}

	fn set_overlap_flags<'a>(
		&'a self,
		updates: Vec<(Uuid, Vec<String>)>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;

			for (chunk_id, flags) in &updates {
				chunks::set_overlap_flags(&mut *tx, *chunk_id, flags, now).await?;
			}

			tx.commit().await?;

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let rows = chunks::search_chunks(
				&self.db.pool,
				query.session_id,
				query.embedding_model_id,
				query.vector,
				limit as i64,
			)
			.await?;
			let stale = chunks::count_stale_chunks(
				&self.db.pool,
				query.session_id,
				query.embedding_model_id,
			)
			.await?;
			let hits = rows
				.into_iter()
				.map(|row| SourceHit {
					source_ref: row.chunk_id.to_string(),
					content: row.text,
					label: Some(row.source_file_name),
					embedding_model_id: row.embedding_model_id,
					raw_score: RawScore::CosineDistance(row.distance),
				})
				.collect();

			Ok(SourceHits { hits, stale_excluded: to_count(stale) })
		})
	}
}
impl KnowledgeStore for PgStore {
	fn insert<'a>(
		&'a self,
		entry: KnowledgeRecord,
		embedding: Vec<f32>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let row = KnowledgeEntryRow {
				entry_id: entry.entry_id,
				session_id: entry.session_id,
				topic: entry.topic,
				content: entry.content,
				embedding_model_id: entry.embedding_model_id,
				created_at: entry.created_at,
			};

			knowledge::insert_entry(&self.db.pool, &row, &embedding).await?;

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let limit = limit as i64;
			let by_vector = knowledge::search_by_vector(
				&self.db.pool,
				query.session_id,
				query.embedding_model_id,
				query.vector,
				limit,
			)
			.await?;
			let by_terms = knowledge::search_by_terms(
				&self.db.pool,
				query.session_id,
				query.embedding_model_id,
				query.terms,
				query.vector,
				limit,
			)
			.await?;
			let stale = knowledge::count_stale_entries(
				&self.db.pool,
				query.session_id,
				query.embedding_model_id,
			)
			.await?;
			let mut seen = AHashSet::new();
			let hits = by_vector
				.into_iter()
				.chain(by_terms)
				.filter(|hit| seen.insert(hit.entry_id))
				.map(knowledge_hit)
				.collect();

			Ok(SourceHits { hits, stale_excluded: to_count(stale) })
		})
	}
}
impl QaStore for PgStore {
	fn upsert<'a>(&'a self, pair: QaRecord, embedding: Vec<f32>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let row = QaPairRow {
				qa_id: pair.qa_id,
				session_id: pair.session_id,
				question: pair.question,
				question_hash: pair.question_hash,
				answer: pair.answer,
				embedding_model_id: pair.embedding_model_id,
				created_at: pair.created_at,
				updated_at: pair.created_at,
			};

			qa::upsert_pair(&self.db.pool, &row, &embedding).await?;

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let rows = qa::search_pairs(
				&self.db.pool,
				query.embedding_model_id,
				query.vector,
				limit as i64,
			)
			.await?;
			let stale = qa::count_stale_pairs(&self.db.pool, query.embedding_model_id).await?;
			let hits = rows
				.into_iter()
				.map(|row| SourceHit {
					source_ref: row.qa_id.to_string(),
					content: row.answer,
					label: Some(row.question),
					embedding_model_id: row.embedding_model_id,
					raw_score: RawScore::CosineDistance(row.distance),
				})
				.collect();

			Ok(SourceHits { hits, stale_excluded: to_count(stale) })
		})
	}
}
impl ComprehensionStore for PgStore {
	fn insert_interaction<'a>(
		&'a self,
		interaction: InteractionRecord,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let row = InteractionRow {
				interaction_id: interaction.interaction_id,
				user_id: interaction.user_id,
				session_id: interaction.session_id,
				query: interaction.query,
				created_at: interaction.created_at,
			};

			comprehension::insert_interaction(&self.db.pool, &row).await?;

			Ok(())
		})
	}

	fn get_interaction<'a>(
		&'a self,
		interaction_id: Uuid,
	) -> BoxFuture<'a, Result<Option<InteractionRecord>>> {
		Box::pin(async move {
			let row = comprehension::get_interaction(&self.db.pool, interaction_id).await?;

			Ok(row.map(|row| InteractionRecord {
				interaction_id: row.interaction_id,
				user_id: row.user_id,
				session_id: row.session_id,
				query: row.query,
				created_at: row.created_at,
			}))
		})
	}

	fn get_state<'a>(
		&'a self,
		user_id: &'a str,
		session_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ComprehensionState>>> {
		Box::pin(async move {
			let row = comprehension::get_state(&self.db.pool, user_id, session_id).await?;

			row.map(|row| self.state_from_row(row)).transpose()
		})
	}

	fn apply_event<'a>(
		&'a self,
		event: ScoredEventRecord,
		initial: ComprehensionState,
		mutator: StateMutator<'a>,
	) -> BoxFuture<'a, Result<EventOutcome>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;

			comprehension::insert_state_if_missing(&mut *tx, &state_row(&initial)?).await?;

			let Some(row) =
				comprehension::lock_state(&mut *tx, &event.user_id, &event.session_id).await?
			else {
				return Err(Error::Storage {
					message: "Comprehension state vanished inside its transaction.".to_string(),
				});
			};
			let mut state = self.state_from_row(row)?;
			let fresh = comprehension::insert_scored_event(&mut *tx, &event_row(&event)).await?;

			if !fresh {
				tx.commit().await?;

				return Ok(EventOutcome::Duplicate { state });
			}

			let change = mutator(&mut state);

			comprehension::update_state(&mut *tx, &state_row(&state)?).await?;
			tx.commit().await?;

			Ok(EventOutcome::Applied { state, change })
		})
	}
}

fn chunk_row(chunk: &ChunkRecord) -> ChunkRow {
	ChunkRow {
		chunk_id: chunk.chunk_id,
		session_id: chunk.session_id.clone(),
		document_id: chunk.document_id.clone(),
		ordinal_index: chunk.ordinal_index,
		text: chunk.text.clone(),
		context_prefix: chunk.context_prefix.clone(),
		source_file_name: chunk.source_file_name.clone(),
		embedding_model_id: chunk.embedding_model_id.clone(),
		overlap_flags: chunk.overlap_flags.clone(),
		created_at: chunk.created_at,
		updated_at: chunk.updated_at,
	}
}

fn chunk_record(row: ChunkRow) -> ChunkRecord {
	ChunkRecord {
		chunk_id: row.chunk_id,
		session_id: row.session_id,
		document_id: row.document_id,
		ordinal_index: row.ordinal_index,
		text: row.text,
		context_prefix: row.context_prefix,
		source_file_name: row.source_file_name,
		embedding_model_id: row.embedding_model_id,
		overlap_flags: row.overlap_flags,
		created_at: row.created_at,
		updated_at: row.updated_at,
	}
}

fn knowledge_hit(hit: KnowledgeHit) -> SourceHit {
	SourceHit {
		source_ref: hit.entry_id.to_string(),
		content: hit.content,
		label: Some(hit.topic),
		embedding_model_id: hit.embedding_model_id,
		raw_score: RawScore::CosineDistance(hit.distance),
	}
}

fn state_row(state: &ComprehensionState) -> Result<ComprehensionRow> {
	Ok(ComprehensionRow {
		user_id: state.user_id.clone(),
		session_id: state.session_id.clone(),
		comprehension_score: state.comprehension_score,
		difficulty_level: state.difficulty_level.as_str().to_string(),
		total_feedback_count: to_i32(state.total_feedback_count)?,
		average_understanding: state.understanding.mean,
		understanding_samples: to_i32(state.understanding.samples)?,
		average_satisfaction: state.satisfaction.mean,
		satisfaction_samples: to_i32(state.satisfaction.samples)?,
		last_updated: state.last_updated,
	})
}

fn event_row(event: &ScoredEventRecord) -> ScoredEventRow {
	ScoredEventRow {
		interaction_id: event.interaction_id,
		kind: event.kind.as_str().to_string(),
		user_id: event.user_id.clone(),
		session_id: event.session_id.clone(),
		emoji: event.emoji.clone(),
		score_contribution: event.score_contribution,
		understanding: event.understanding.map(i16::from),
		satisfaction: event.satisfaction.map(i16::from),
		created_at: event.created_at,
	}
}

fn to_i32(value: u32) -> Result<i32> {
	i32::try_from(value)
		.map_err(|_| Error::Storage { message: format!("Counter {value} does not fit storage.") })
}

fn to_u32(value: i32) -> Result<u32> {
	u32::try_from(value)
		.map_err(|_| Error::Storage { message: format!("Stored counter {value} is negative.") })
}

fn to_count(value: i64) -> usize {
	usize::try_from(value).unwrap_or_default()
}
