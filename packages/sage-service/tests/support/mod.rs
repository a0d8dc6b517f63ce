#![allow(dead_code)]

use std::{
	io::{self, Write},
	sync::{Arc, Mutex},
	time::Duration,
};

use serde_json::Map;
use tracing_subscriber::fmt::MakeWriter;

use sage_config::{
	Adequacy, Chunking, Config, EmbeddingProviderConfig, Ebars, Jobs, KnowledgeBaseLookup,
	LocalRerank, ProviderConfig, Providers as ProviderSettings, RerankConfig, Retrieval, Service,
	SourceThresholds, Storage,
};
use sage_service::{
	BoxFuture, EmbeddingProvider, Error, Providers, RerankProvider, SageService, Stores,
	stores::{KnowledgeRecord, KnowledgeStore, SourceHits, SourceQuery},
};

pub const DIMS: usize = 256;

/// Bag-of-words vectors over hashed lowercase words. Texts sharing words point the same way.
pub fn bag_of_words(text: &str) -> Vec<f32> {
	let mut vector = vec![0.0_f32; DIMS];

	for word in text.split(|c: char| !c.is_alphanumeric()).filter(|word| !word.is_empty()) {
		let hash = word
			.to_lowercase()
			.bytes()
			.fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
				(acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
			});

		vector[(hash % DIMS as u64) as usize] += 1.0;
	}

	let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();

	if norm == 0.0 {
		vector[0] = 1.0;

		return vector;
	}

	vector.iter().map(|value| value / norm).collect()
}

pub struct StubEmbedding {
	pub delay: Duration,
	pub fail: bool,
}
impl StubEmbedding {
	pub fn working() -> Self {
		Self { delay: Duration::ZERO, fail: false }
	}
}
impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}
			if self.fail {
				return Err(sage_providers::Error::InvalidResponse {
					message: "Embedding backend is down.".to_string(),
				});
			}

			Ok(texts.iter().map(|text| bag_of_words(text)).collect())
		})
	}
}

pub enum StubRerank {
	/// Scores each document by its length, so longer documents rank first.
	ByLength,
	Failing,
}
impl RerankProvider for StubRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<f32>>> {
		Box::pin(async move {
			match self {
				Self::ByLength => Ok(docs.iter().map(|doc| doc.len() as f32).collect()),
				Self::Failing => Err(sage_providers::Error::InvalidResponse {
					message: "Rerank backend returned 502.".to_string(),
				}),
			}
		})
	}
}

/// Delays every search, to stand in for a source that stops answering.
pub struct SlowKnowledge {
	pub inner: Arc<dyn KnowledgeStore>,
	pub delay: Duration,
}
impl KnowledgeStore for SlowKnowledge {
	fn insert<'a>(
		&'a self,
		entry: KnowledgeRecord,
		embedding: Vec<f32>,
	) -> BoxFuture<'a, sage_service::Result<()>> {
		self.inner.insert(entry, embedding)
	}

	fn search<'a>(
		&'a self,
		query: SourceQuery<'a>,
		limit: usize,
	) -> BoxFuture<'a, sage_service::Result<SourceHits>> {
		Box::pin(async move {
			tokio::time::sleep(self.delay).await;

			self.inner.search(query, limit).await
		})
	}
}

/// Rejects every write, to stand in for a store that is down.
pub struct FailingKnowledge;
impl KnowledgeStore for FailingKnowledge {
	fn insert<'a>(
		&'a self,
		_entry: KnowledgeRecord,
		_embedding: Vec<f32>,
	) -> BoxFuture<'a, sage_service::Result<()>> {
		Box::pin(async { Err(Error::Storage { message: "Knowledge store is down.".to_string() }) })
	}

	fn search<'a>(
		&'a self,
		_query: SourceQuery<'a>,
		_limit: usize,
	) -> BoxFuture<'a, sage_service::Result<SourceHits>> {
		Box::pin(async { Ok(SourceHits::default()) })
	}
}

/// Collects formatted log lines so tests can check what was reported.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);
impl LogBuffer {
	pub fn contents(&self) -> String {
		String::from_utf8_lossy(&self.0.lock().expect("Log buffer lock poisoned.")).into_owned()
	}
}
impl Write for LogBuffer {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().expect("Log buffer lock poisoned.").extend_from_slice(buf);

		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}
impl<'a> MakeWriter<'a> for LogBuffer {
	type Writer = Self;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}

pub fn remote_rerank(api_key: &str) -> RerankConfig {
	RerankConfig::Remote(ProviderConfig {
		provider_id: "stub".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: api_key.to_string(),
		path: "/v1/rerank".to_string(),
		model: "stub-rerank".to_string(),
		timeout_ms: 1_000,
		default_headers: Map::new(),
	})
}

pub fn local_rerank() -> RerankConfig {
	RerankConfig::Local(LocalRerank { lexical_weight: 0.5, max_query_terms: 16 })
}

pub fn test_config(rerank: RerankConfig) -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage { postgres: None, vector_dim: DIMS as u32 },
		providers: ProviderSettings {
			embedding: EmbeddingProviderConfig {
				provider_id: "stub".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "bag-of-words".to_string(),
				dimensions: DIMS as u32,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			rerank,
		},
		chunking: Chunking {
			chunk_size: 1_000,
			overlap_budget: 200,
			boundary_window: 100,
			partial_window: 50,
			sentence_window: 3,
			embed_batch_size: 4,
		},
		retrieval: Retrieval {
			top_k: 5,
			candidate_k: 20,
			source_timeout_ms: 150,
			request_timeout_ms: 2_000,
			rerank_timeout_ms: 500,
			dedup_threshold: 0.95,
			thresholds: SourceThresholds { chunk: 0.1, knowledge_base: 0.1, qa_pair: 0.5 },
			knowledge_base: KnowledgeBaseLookup::default(),
			adequacy: Adequacy::default(),
		},
		ebars: Ebars::default(),
		jobs: Jobs::default(),
	}
}

pub fn service(rerank: RerankConfig) -> SageService {
	service_with(test_config(rerank), Stores::in_memory(), StubRerank::ByLength)
}

pub fn service_with(cfg: Config, stores: Stores, rerank: StubRerank) -> SageService {
	SageService::with_providers(
		cfg,
		stores,
		Providers::new(Arc::new(StubEmbedding::working()), Arc::new(rerank)),
	)
}

/// `sentences` sentences of exactly 100 characters, each made of words unique to it.
pub fn numbered_document(sentences: usize) -> String {
	const WORDS: [&str; 6] = ["Alpha", "beta", "gamma", "delta", "omega", "sigma"];

	(0..sentences)
		.map(|idx| {
			let mut body: String =
				WORDS.iter().cycle().take(12).map(|word| format!("{word}{idx:03} ")).collect();

			body.truncate(98);

			format!("{body}. ")
		})
		.collect()
}
