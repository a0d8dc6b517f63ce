use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub chunking: Chunking,
	pub retrieval: Retrieval,
	#[serde(default)]
	pub ebars: Ebars,
	#[serde(default)]
	pub jobs: Jobs,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	/// Optional. When absent the service runs on in-process stores.
	pub postgres: Option<Postgres>,
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: RerankConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Reranker selection. Exactly one strategy is built from this at startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RerankConfig {
	None,
	Local(LocalRerank),
	Remote(ProviderConfig),
}
impl RerankConfig {
	pub fn label(&self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Local(_) => "local",
			Self::Remote(_) => "remote",
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LocalRerank {
	/// Share of the final score taken from query/content term overlap. The remainder comes from
	/// the retrieval similarity.
	pub lexical_weight: f32,
	pub max_query_terms: u32,
}
impl Default for LocalRerank {
	fn default() -> Self {
		Self { lexical_weight: 0.6, max_query_terms: 32 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chunking {
	/// Target chunk size in characters.
	pub chunk_size: usize,
	/// Characters of trailing context carried into the next chunk at construction time.
	pub overlap_budget: usize,
	#[serde(default = "default_boundary_window")]
	pub boundary_window: usize,
	#[serde(default = "default_partial_window")]
	pub partial_window: usize,
	#[serde(default = "default_sentence_window")]
	pub sentence_window: usize,
	#[serde(default = "default_embed_batch_size")]
	pub embed_batch_size: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Retrieval {
	pub top_k: u32,
	pub candidate_k: u32,
	pub source_timeout_ms: u64,
	pub request_timeout_ms: u64,
	pub rerank_timeout_ms: u64,
	pub dedup_threshold: f32,
	pub thresholds: SourceThresholds,
	#[serde(default)]
	pub knowledge_base: KnowledgeBaseLookup,
	#[serde(default)]
	pub adequacy: Adequacy,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SourceThresholds {
	pub chunk: f32,
	pub knowledge_base: f32,
	pub qa_pair: f32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseLookup {
	/// Weight of the keyword overlap signal when it beats the vector similarity.
	pub keyword_weight: f32,
	pub max_query_terms: u32,
}
impl Default for KnowledgeBaseLookup {
	fn default() -> Self {
		Self { keyword_weight: 0.9, max_query_terms: 16 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Adequacy {
	pub min_candidates: u32,
	pub min_top_score: f32,
	pub ambiguous_top_score: f32,
}
impl Default for Adequacy {
	fn default() -> Self {
		Self { min_candidates: 1, min_top_score: 0.55, ambiguous_top_score: 0.35 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ebars {
	pub min_score: f32,
	pub max_score: f32,
	pub initial_score: f32,
	/// Largest score movement of a single event at full sensitivity.
	pub max_step: f32,
	/// Sensitivity applied to the very first event.
	pub min_sensitivity: f32,
	/// Feedback count over which sensitivity rises towards 1.0.
	pub warmup_events: f32,
	pub thresholds: LevelThresholds,
}
impl Default for Ebars {
	fn default() -> Self {
		Self {
			min_score: 0.0,
			max_score: 100.0,
			initial_score: 50.0,
			max_step: 10.0,
			min_sensitivity: 0.4,
			warmup_events: 5.0,
			thresholds: LevelThresholds::default(),
		}
	}
}

/// Lower bounds (inclusive) of each level above `very_struggling`.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
	pub struggling: f32,
	pub normal: f32,
	pub good: f32,
	pub excellent: f32,
}
impl Default for LevelThresholds {
	fn default() -> Self {
		Self { struggling: 30.0, normal: 45.0, good: 70.0, excellent: 85.0 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Jobs {
	pub ttl_secs: u64,
	pub sweep_interval_secs: u64,
}
impl Default for Jobs {
	fn default() -> Self {
		Self { ttl_secs: 3_600, sweep_interval_secs: 60 }
	}
}

fn default_boundary_window() -> usize {
	100
}

fn default_partial_window() -> usize {
	50
}

fn default_sentence_window() -> usize {
	3
}

fn default_embed_batch_size() -> usize {
	32
}
