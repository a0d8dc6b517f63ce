//! Store contracts used by the service, with in-memory and Postgres implementations.
//!
//! Every store that feeds retrieval exposes the same `search` shape so the merger can treat the
//! three evidence sources uniformly. Searches only rank vectors from the query's embedding
//! model.

pub mod memory;
pub mod pg;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BoxFuture, Result};
use sage_domain::{ComprehensionState, ScoreChange};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	Chunk,
	KnowledgeBase,
	QaPair,
}
impl SourceKind {
	pub const ALL: [Self; 3] = [Self::Chunk, Self::KnowledgeBase, Self::QaPair];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Chunk => "chunk",
			Self::KnowledgeBase => "knowledge_base",
			Self::QaPair => "qa_pair",
		}
	}
}

/// What a source is asked for. Sources use whichever signals they support.
///
/// Only records embedded with `embedding_model_id` are eligible. Vectors from another model live
/// in a different space, so they are counted and never ranked.
#[derive(Clone, Copy, Debug)]
pub struct SourceQuery<'a> {
	pub session_id: &'a str,
	pub embedding_model_id: &'a str,
	pub text: &'a str,
	pub terms: &'a [String],
	pub vector: &'a [f32],
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "metric", content = "value", rename_all = "snake_case")]
pub enum RawScore {
	/// Cosine distance in `[0, 2]`. Smaller is closer.
	CosineDistance(f64),
}

#[derive(Clone, Debug)]
pub struct SourceHit {
	pub source_ref: String,
	pub content: String,
	pub label: Option<String>,
	pub embedding_model_id: String,
	pub raw_score: RawScore,
}

#[derive(Clone, Debug, Default)]
pub struct SourceHits {
	pub hits: Vec<SourceHit>,
	/// Records in scope that were skipped because another model embedded them.
	pub stale_excluded: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkRecord {
	pub chunk_id: Uuid,
	pub session_id: String,
	pub document_id: String,
	pub ordinal_index: i32,
	pub text: String,
	pub context_prefix: String,
	pub source_file_name: String,
	pub embedding_model_id: String,
	pub overlap_flags: Vec<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeRecord {
	pub entry_id: Uuid,
	pub session_id: String,
	pub topic: String,
	pub content: String,
	pub embedding_model_id: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QaRecord {
	pub qa_id: Uuid,
	pub session_id: String,
	pub question: String,
	pub question_hash: String,
	pub answer: String,
	pub embedding_model_id: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InteractionRecord {
	pub interaction_id: Uuid,
	pub user_id: String,
	pub session_id: String,
	pub query: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Feedback,
	Outcome,
}
impl EventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Feedback => "feedback",
			Self::Outcome => "outcome",
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredEventRecord {
	pub interaction_id: Uuid,
	pub kind: EventKind,
	pub user_id: String,
	pub session_id: String,
	pub emoji: Option<String>,
	pub score_contribution: f32,
	pub understanding: Option<u8>,
	pub satisfaction: Option<u8>,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventOutcome {
	Applied { state: ComprehensionState, change: ScoreChange },
	/// The interaction already has an event of this kind. Nothing changed.
	Duplicate { state: ComprehensionState },
}

/// Applied to the stored state while the per-key lock is held.
pub type StateMutator<'a> = &'a (dyn Fn(&mut ComprehensionState) -> ScoreChange + Send + Sync);

pub trait ChunkStore
where
	Self: Send + Sync,
{
	/// Replaces every chunk of one document. Readers see either the old set or the new one.
	fn replace_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
		chunks: Vec<(ChunkRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<()>>;

	fn list_document<'a>(
		&'a self,
		session_id: &'a str,
		document_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<ChunkRecord>>>;

	fn get<'a>(&'a self, chunk_id: Uuid) -> BoxFuture<'a, Result<Option<ChunkRecord>>>;

	/// Rewrites one chunk's text and context prefix, and clears its overlap flags.
	fn rewrite<'a>(
		&'a self,
		chunk_id: Uuid,
		text: &'a str,
		context_prefix: &'a str,
		embedding: Vec<f32>,
		embedding_model_id: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn set_overlap_flags<'a>(
		&'a self,
		updates: Vec<(Uuid, Vec<String>)>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>>;
}

pub trait KnowledgeStore
where
	Self: Send + Sync,
{
	fn insert<'a>(
		&'a self,
		entry: KnowledgeRecord,
		embedding: Vec<f32>,
	) -> BoxFuture<'a, Result<()>>;

	/// Semantic neighbours plus keyword matches on topic or content, scoped to the session.
	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>>;
}

pub trait QaStore
where
	Self: Send + Sync,
{
	/// Inserts a pair or replaces the answer of the same question in the same session.
	fn upsert<'a>(&'a self, pair: QaRecord, embedding: Vec<f32>) -> BoxFuture<'a, Result<()>>;

	/// Semantic neighbours across every session.
	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, Result<SourceHits>>;
}

pub trait ComprehensionStore
where
	Self: Send + Sync,
{
	fn insert_interaction<'a>(
		&'a self,
		interaction: InteractionRecord,
	) -> BoxFuture<'a, Result<()>>;

	fn get_interaction<'a>(
		&'a self,
		interaction_id: Uuid,
	) -> BoxFuture<'a, Result<Option<InteractionRecord>>>;

	fn get_state<'a>(
		&'a self,
		user_id: &'a str,
		session_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ComprehensionState>>>;

	/// Records `event` and applies `mutator` to the state of its (user, session) key as one
	/// serialized step. A missing state starts from `initial`.
	fn apply_event<'a>(
		&'a self,
		event: ScoredEventRecord,
		initial: ComprehensionState,
		mutator: StateMutator<'a>,
	) -> BoxFuture<'a, Result<EventOutcome>>;
}

#[derive(Clone)]
pub struct Stores {
	pub chunks: Arc<dyn ChunkStore>,
	pub knowledge: Arc<dyn KnowledgeStore>,
	pub qa: Arc<dyn QaStore>,
	pub comprehension: Arc<dyn ComprehensionStore>,
}
impl Stores {
	pub fn in_memory() -> Self {
		Self {
			chunks: Arc::new(memory::MemoryChunkStore::default()),
			knowledge: Arc::new(memory::MemoryKnowledgeStore::default()),
			qa: Arc::new(memory::MemoryQaStore::default()),
			comprehension: Arc::new(memory::MemoryComprehensionStore::default()),
		}
	}

	/// `ebars` supplies the level thresholds applied when comprehension state is loaded.
	pub fn postgres(db: Arc<sage_storage::db::Db>, ebars: sage_config::Ebars) -> Self {
		let store = Arc::new(pg::PgStore::new(db, ebars));

		Self {
			chunks: store.clone(),
			knowledge: store.clone(),
			qa: store.clone(),
			comprehension: store,
		}
	}
}
