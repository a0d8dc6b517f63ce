use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkRow {
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

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkHit {
	pub chunk_id: Uuid,
	pub document_id: String,
	pub ordinal_index: i32,
	pub text: String,
	pub source_file_name: String,
	pub embedding_model_id: String,
	pub distance: f64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KnowledgeEntryRow {
	pub entry_id: Uuid,
	pub session_id: String,
	pub topic: String,
	pub content: String,
	pub embedding_model_id: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KnowledgeHit {
	pub entry_id: Uuid,
	pub topic: String,
	pub content: String,
	pub embedding_model_id: String,
	pub distance: f64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct QaPairRow {
	pub qa_id: Uuid,
	pub session_id: String,
	pub question: String,
	pub question_hash: String,
	pub answer: String,
	pub embedding_model_id: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct QaHit {
	pub qa_id: Uuid,
	pub question: String,
	pub answer: String,
	pub embedding_model_id: String,
	pub distance: f64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct InteractionRow {
	pub interaction_id: Uuid,
	pub user_id: String,
	pub session_id: String,
	pub query: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ComprehensionRow {
	pub user_id: String,
	pub session_id: String,
	pub comprehension_score: f32,
	pub difficulty_level: String,
	pub total_feedback_count: i32,
	pub average_understanding: Option<f32>,
	pub understanding_samples: i32,
	pub average_satisfaction: Option<f32>,
	pub satisfaction_samples: i32,
	pub last_updated: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ScoredEventRow {
	pub interaction_id: Uuid,
	/// `feedback` or `outcome`.
	pub kind: String,
	pub user_id: String,
	pub session_id: String,
	pub emoji: Option<String>,
	pub score_contribution: f32,
	pub understanding: Option<i16>,
	pub satisfaction: Option<i16>,
	pub created_at: OffsetDateTime,
}
