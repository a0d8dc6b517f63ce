pub mod error;
pub mod ingest;
pub mod jobs;
pub mod knowledge;
pub mod rerank;
pub mod retrieval;
pub mod scoring;
pub mod stores;
pub mod text;

pub use error::{Error, Result};
pub use ingest::{
	AuditFinding, AuditRequest, AuditResponse, ImproveChunkRequest, ImproveChunkResponse,
	IngestRequest, IngestResponse,
};
pub use jobs::{IngestJob, IngestJobs, JobFailure, JobStatus};
pub use knowledge::{
	CacheAnswerRequest, CacheAnswerResponse, KnowledgeEntryRequest, KnowledgeEntryResponse,
};
pub use rerank::{RerankOutcome, Reranker};
pub use retrieval::{
	EvidenceCandidate, EvidenceCompleteness, RankingStatus, RetrieveRequest, RetrieveResponse,
	SourceReport, SourceStatus, ThresholdOverrides, Verdict,
};
pub use scoring::{
	FeedbackRequest, InteractionRequest, InteractionResponse, LearnerProfile, OutcomeRequest,
	ProfileRequest, ScoreResponse,
};
pub use stores::{SourceKind, Stores};

use std::{future::Future, pin::Pin, sync::Arc};

use sage_config::{Config, EmbeddingProviderConfig, ProviderConfig};
use sage_providers::{embedding, rerank as remote_rerank};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<f32>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, rerank: Arc<dyn RerankProvider>) -> Self {
		Self { embedding, rerank }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider }
	}
}

pub struct SageService {
	pub cfg: Config,
	pub stores: Stores,
	pub providers: Providers,
	pub reranker: Reranker,
	embedding_model_id: String,
}
impl SageService {
	pub fn new(cfg: Config, stores: Stores) -> Self {
		Self::with_providers(cfg, stores, Providers::default())
	}

	pub fn with_providers(cfg: Config, stores: Stores, providers: Providers) -> Self {
		let reranker = Reranker::from_config(&cfg.providers.rerank);
		let embedding_model_id = embedding_model_id(&cfg);

		tracing::info!(
			embedding_model_id = %embedding_model_id,
			rerank_mode = reranker.mode(),
			"Service initialized."
		);

		Self { cfg, stores, providers, reranker, embedding_model_id }
	}

	/// Identifier recorded with every stored vector. Vectors carrying another id are never
	/// compared against query vectors of this one.
	pub fn embedding_model_id(&self) -> &str {
		&self.embedding_model_id
	}

	/// Embeds `texts` in configured batches and checks every vector against the storage
	/// dimension.
	pub(crate) async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let batch_size = self.cfg.chunking.embed_batch_size.max(1);
		let expected_dim = self.cfg.storage.vector_dim as usize;
		let mut out = Vec::with_capacity(texts.len());

		for batch in texts.chunks(batch_size) {
			let vectors = self
				.providers
				.embedding
				.embed(&self.cfg.providers.embedding, batch)
				.await
				.map_err(embedding_error)?;

			if vectors.len() != batch.len() {
				return Err(Error::Provider {
					message: format!(
						"Embedding provider returned {} vectors for {} inputs.",
						vectors.len(),
						batch.len()
					),
				});
			}

			for vector in vectors {
				if vector.len() != expected_dim {
					return Err(Error::Configuration {
						message: format!(
							"Embedding model {} returned {} dimensions; storage expects {expected_dim}.",
							self.embedding_model_id,
							vector.len()
						),
					});
				}
				if vector.iter().any(|value| !value.is_finite()) {
					return Err(Error::Provider {
						message: "Embedding vector contains a non-finite value.".to_string(),
					});
				}

				out.push(vector);
			}
		}

		Ok(out)
	}

	pub(crate) async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
		self.embed_all(&[text.to_string()]).await?.into_iter().next().ok_or_else(|| {
			Error::Provider { message: "Embedding provider returned no vectors.".to_string() }
		})
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}
impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<f32>>> {
		Box::pin(remote_rerank::rerank(cfg, query, docs))
	}
}

pub fn embedding_model_id(cfg: &Config) -> String {
	format!(
		"{}:{}:{}",
		cfg.providers.embedding.provider_id, cfg.providers.embedding.model, cfg.storage.vector_dim
	)
}

/// Embedding is required by every write and by retrieval, so a failing provider makes the
/// operation unavailable rather than degraded.
pub(crate) fn embedding_error(err: sage_providers::Error) -> Error {
	match err {
		sage_providers::Error::InvalidConfig { message } => Error::Configuration { message },
		other => Error::Unavailable { message: format!("Embedding provider failed: {other}") },
	}
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(Error::invalid(format!("{field} must not be empty.")));
	}

	Ok(())
}
