use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result, SageService,
	stores::{KnowledgeRecord, QaRecord},
	text,
};

const QA_ID_NAMESPACE: Uuid = Uuid::from_u128(0x0c7d_2e91_a4b8_4f35_8d6a_e19f_3b52_c870);

#[derive(Clone, Debug, Deserialize)]
pub struct KnowledgeEntryRequest {
	pub session_id: String,
	pub topic: String,
	pub content: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct KnowledgeEntryResponse {
	pub entry_id: Uuid,
	pub embedding_model_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheAnswerRequest {
	pub session_id: String,
	pub question: String,
	pub answer: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheAnswerResponse {
	pub qa_id: Uuid,
	pub question_hash: String,
	pub embedding_model_id: String,
}

impl SageService {
	pub async fn add_knowledge_entry(
		&self,
		req: KnowledgeEntryRequest,
	) -> Result<KnowledgeEntryResponse> {
		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("topic", &req.topic)?;
		crate::require_text("content", &req.content)?;

		let vector = self.embed_one(&format!("{}\n{}", req.topic.trim(), req.content.trim())).await?;
		let entry = KnowledgeRecord {
			entry_id: Uuid::new_v4(),
			session_id: req.session_id,
			topic: req.topic.trim().to_string(),
			content: req.content.trim().to_string(),
			embedding_model_id: self.embedding_model_id().to_string(),
			created_at: OffsetDateTime::now_utc(),
		};
		let entry_id = entry.entry_id;
		let session_id = entry.session_id.clone();

		self.stores.knowledge.insert(entry, vector).await?;

		tracing::info!(entry_id = %entry_id, session_id = %session_id, "Knowledge entry added.");

		Ok(KnowledgeEntryResponse {
			entry_id,
			embedding_model_id: self.embedding_model_id().to_string(),
		})
	}

	/// Caches an answer. Asking the same question again in the same session replaces the answer.
	pub async fn cache_answer(&self, req: CacheAnswerRequest) -> Result<CacheAnswerResponse> {
		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("question", &req.question)?;
		crate::require_text("answer", &req.answer)?;

		let question_hash = text::fingerprint(&req.question);
		let qa_id = Uuid::new_v5(
			&QA_ID_NAMESPACE,
			format!("{}\u{1f}{question_hash}", req.session_id).as_bytes(),
		);
		let vector = self.embed_one(req.question.trim()).await?;
		let pair = QaRecord {
			qa_id,
			session_id: req.session_id,
			question: req.question.trim().to_string(),
			question_hash: question_hash.clone(),
			answer: req.answer.trim().to_string(),
			embedding_model_id: self.embedding_model_id().to_string(),
			created_at: OffsetDateTime::now_utc(),
		};

		self.stores.qa.upsert(pair, vector).await?;

		tracing::debug!(qa_id = %qa_id, "Answer cached.");

		Ok(CacheAnswerResponse {
			qa_id,
			question_hash,
			embedding_model_id: self.embedding_model_id().to_string(),
		})
	}
}
