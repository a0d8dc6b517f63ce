//! Process-local stores for tests and single-node runs without Postgres.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::{AHashMap, AHashSet};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	stores::{
		ChunkRecord, ChunkStore, ComprehensionStore, EventKind, EventOutcome, InteractionRecord,
		KnowledgeRecord, KnowledgeStore, QaRecord, QaStore, RawScore, ScoredEventRecord,
		SourceHit, SourceHits, SourceQuery, StateMutator,
	},
	text,
};
use sage_domain::ComprehensionState;
use sage_providers::embedding::cosine_similarity;

type DocumentKey = (String, String);
type StateSlot = Arc<AsyncMutex<Option<ComprehensionState>>>;

#[derive(Default)]
pub struct MemoryChunkStore {
	documents: RwLock<AHashMap<DocumentKey, Vec<(ChunkRecord, Vec<f32>)>>>,
}
impl ChunkStore for MemoryChunkStore {
	fn replace_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
		chunks: Vec<(ChunkRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut seen = AHashSet::new();

			for (chunk, _) in &chunks {
				if !seen.insert(chunk.ordinal_index) {
					return Err(Error::Conflict {
						message: format!(
							"Chunk ordinal {} already exists for document {document_id}.",
							chunk.ordinal_index
						),
					});
				}
			}

			let key = (session_id.to_string(), document_id.to_string());

			write(&self.documents).insert(key, chunks);

			Ok(())
		})
	}

	fn list_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<ChunkRecord>>> {
		Box::pin(async move {
			let key = (session_id.to_string(), document_id.to_string());
			let mut chunks: Vec<ChunkRecord> = read(&self.documents)
				.get(&key)
				.map(|chunks| chunks.iter().map(|(chunk, _)| chunk.clone()).collect())
				.unwrap_or_default();

			chunks.sort_by_key(|chunk| chunk.ordinal_index);

			Ok(chunks)
		})
	}

	fn get<'a>(&'a self, chunk_id: Uuid) -> BoxFuture<'a, Result<Option<ChunkRecord>>> {
		Box::pin(async move {
			let found = read(&self.documents)
				.values()
				.flatten()
				.find(|(chunk, _)| chunk.chunk_id == chunk_id)
				.map(|(chunk, _)| chunk.clone());

			Ok(found)
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
			let mut documents = write(&self.documents);
			let Some((chunk, vector)) = documents
				.values_mut()
				.flatten()
				.find(|(chunk, _)| chunk.chunk_id == chunk_id)
			else {
				return Err(Error::NotFound { message: format!("Chunk {chunk_id} does not exist.") });
			};

			chunk.text = text.to_string();
			chunk.context_prefix = context_prefix.to_string();
			chunk.embedding_model_id = embedding_model_id.to_string();
			chunk.overlap_flags.clear();
			chunk.updated_at = now;
			*vector = embedding;

			Ok(())
		})
	}

	fn set_overlap_flags<'a>(
		&'a self,
		updates: Vec<(Uuid, Vec<String>)>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let updates: AHashMap<Uuid, Vec<String>> = updates.into_iter().collect();
			let mut documents = write(&self.documents);

			for (chunk, _) in documents.values_mut().flatten() {
				if let Some(flags) = updates.get(&chunk.chunk_id) {
					chunk.overlap_flags = flags.clone();
					chunk.updated_at = now;
				}
			}

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let documents = read(&self.documents);
			let (current, stale): (Vec<_>, Vec<_>) = documents
				.iter()
				.filter(|((session_id, _), _)| session_id == query.session_id)
				.flat_map(|(_, chunks)| chunks.iter())
				.partition(|(chunk, _)| chunk.embedding_model_id == query.embedding_model_id);
			let hits = current
				.into_iter()
				.map(|(chunk, vector)| SourceHit {
					source_ref: chunk.chunk_id.to_string(),
					content: chunk.text.clone(),
					label: Some(chunk.source_file_name.clone()),
					embedding_model_id: chunk.embedding_model_id.clone(),
					raw_score: distance(query.vector, vector),
				})
				.collect();

			Ok(SourceHits { hits: nearest(hits, limit), stale_excluded: stale.len() })
		})
	}
}

#[derive(Default)]
pub struct MemoryKnowledgeStore {
	entries: RwLock<Vec<(KnowledgeRecord, Vec<f32>)>>,
}
impl KnowledgeStore for MemoryKnowledgeStore {
	fn insert<'a>(
		&'a self,
		entry: KnowledgeRecord,
		embedding: Vec<f32>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			write(&self.entries).push((entry, embedding));

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let entries = read(&self.entries);
			let to_hit = |entry: &KnowledgeRecord, vector: &[f32]| SourceHit {
				source_ref: entry.entry_id.to_string(),
				content: entry.content.clone(),
				label: Some(entry.topic.clone()),
				embedding_model_id: entry.embedding_model_id.clone(),
				raw_score: distance(query.vector, vector),
			};
			let (in_session, stale): (Vec<_>, Vec<_>) = entries
				.iter()
				.filter(|(entry, _)| entry.session_id == query.session_id)
				.partition(|(entry, _)| entry.embedding_model_id == query.embedding_model_id);
			let mut hits = nearest(
				in_session.iter().map(|(entry, vector)| to_hit(entry, vector)).collect(),
				limit,
			);
			let mut seen: AHashSet<String> = hits.iter().map(|hit| hit.source_ref.clone()).collect();

			for (entry, vector) in in_session {
				if seen.contains(&entry.entry_id.to_string()) {
					continue;
				}

				let tokens = text::tokens(&format!("{} {}", entry.topic, entry.content));

				if query.terms.iter().any(|term| tokens.contains(term)) {
					seen.insert(entry.entry_id.to_string());
					hits.push(to_hit(entry, vector));
				}
				if hits.len() >= limit * 2 {
					break;
				}
			}

			Ok(SourceHits { hits, stale_excluded: stale.len() })
		})
	}
}

#[derive(Default)]
pub struct MemoryQaStore {
	pairs: RwLock<AHashMap<(String, String), (QaRecord, Vec<f32>)>>,
}
impl QaStore for MemoryQaStore {
	fn upsert<'a>(&'a self, pair: QaRecord, embedding: Vec<f32>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let key = (pair.session_id.clone(), pair.question_hash.clone());
			let mut pairs = write(&self.pairs);

			match pairs.get_mut(&key) {
				Some((existing, vector)) => {
					existing.answer = pair.answer;
					existing.embedding_model_id = pair.embedding_model_id;
					*vector = embedding;
				},
				None => {
					pairs.insert(key, (pair, embedding));
				},
			}

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>> {
		Box::pin(async move {
			let pairs = read(&self.pairs);
			let (current, stale): (Vec<_>, Vec<_>) = pairs
				.values()
				.partition(|(pair, _)| pair.embedding_model_id == query.embedding_model_id);
			let hits = current
				.into_iter()
				.map(|(pair, vector)| SourceHit {
					source_ref: pair.qa_id.to_string(),
					content: pair.answer.clone(),
					label: Some(pair.question.clone()),
					embedding_model_id: pair.embedding_model_id.clone(),
					raw_score: distance(query.vector, vector),
				})
				.collect();

			Ok(SourceHits { hits: nearest(hits, limit), stale_excluded: stale.len() })
		})
	}
}

#[derive(Default)]
pub struct MemoryComprehensionStore {
	interactions: RwLock<AHashMap<Uuid, InteractionRecord>>,
	states: Mutex<AHashMap<DocumentKey, StateSlot>>,
	events: Mutex<AHashSet<(Uuid, EventKind)>>,
}
impl MemoryComprehensionStore {
	fn slot(&self, user_id: &str, session_id: &str) -> StateSlot {
		lock(&self.states)
			.entry((user_id.to_string(), session_id.to_string()))
			.or_default()
			.clone()
	}
}
impl ComprehensionStore for MemoryComprehensionStore {
	fn insert_interaction<'a>(
		&'a self,
		interaction: InteractionRecord,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut interactions = write(&self.interactions);

			if interactions.contains_key(&interaction.interaction_id) {
				return Err(Error::Conflict {
					message: format!("Interaction {} already exists.", interaction.interaction_id),
				});
			}

			interactions.insert(interaction.interaction_id, interaction);

			Ok(())
		})
	}

	fn get_interaction<'a>(
		&'a self,
		interaction_id: Uuid,
	) -> BoxFuture<'a, Result<Option<InteractionRecord>>> {
		Box::pin(async move { Ok(read(&self.interactions).get(&interaction_id).cloned()) })
	}

	fn get_state<'a>(
		&'a self,
		user_id: &'a str,
		session_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ComprehensionState>>> {
		Box::pin(async move {
			let slot = {
				let states = lock(&self.states);

				states.get(&(user_id.to_string(), session_id.to_string())).cloned()
			};
			let Some(slot) = slot else {
				return Ok(None);
			};
			let state = slot.lock().await.clone();

			Ok(state)
		})
	}

	fn apply_event<'a>(
		&'a self,
		event: ScoredEventRecord,
		initial: ComprehensionState,
		mutator: StateMutator<'a>,
	) -> BoxFuture<'a, Result<EventOutcome>> {
		Box::pin(async move {
			let slot = self.slot(&event.user_id, &event.session_id);
			let mut guard = slot.lock().await;
			let fresh = lock(&self.events).insert((event.interaction_id, event.kind));
			let mut state = guard.clone().unwrap_or(initial);

			if !fresh {
				return Ok(EventOutcome::Duplicate { state });
			}

			let change = mutator(&mut state);

			*guard = Some(state.clone());

			Ok(EventOutcome::Applied { state, change })
		})
	}
}

fn distance(query: &[f32], vector: &[f32]) -> RawScore {
	RawScore::CosineDistance(1.0 - f64::from(cosine_similarity(query, vector)))
}

fn nearest(mut hits: Vec<SourceHit>, limit: usize) -> Vec<SourceHit> {
	hits.sort_by(|a, b| {
		let RawScore::CosineDistance(da) = a.raw_score;
		let RawScore::CosineDistance(db) = b.raw_score;

		da.total_cmp(&db).then_with(|| a.source_ref.cmp(&b.source_ref))
	});
	hits.truncate(limit);

	hits
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
	lock.read().unwrap_or_else(|err| err.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
	lock.write().unwrap_or_else(|err| err.into_inner())
}
