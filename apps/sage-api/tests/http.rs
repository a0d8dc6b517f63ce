use std::{sync::Arc, time::Duration};

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::{Map, Value, json};
use tower::util::ServiceExt;

use sage_api::{routes, state::AppState};
use sage_config::{
	Adequacy, Chunking, Config, Ebars, EmbeddingProviderConfig, Jobs, KnowledgeBaseLookup,
	Postgres, ProviderConfig, Providers as ProviderSettings, RerankConfig, Retrieval, Service,
	SourceThresholds, Storage,
};
use sage_service::{BoxFuture, EmbeddingProvider, Providers, RerankProvider, SageService, Stores};
use sage_testkit::TestDatabase;

const DIMS: usize = 64;

struct HashedWords;
impl EmbeddingProvider for HashedWords {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|text| hashed_words(text)).collect()) })
	}
}
impl RerankProvider for HashedWords {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, sage_providers::Result<Vec<f32>>> {
		Box::pin(async move { Ok(vec![0.0; docs.len()]) })
	}
}

fn hashed_words(text: &str) -> Vec<f32> {
	let mut vector = vec![0.0_f32; DIMS];

	for word in text.split(|c: char| !c.is_alphanumeric()).filter(|word| !word.is_empty()) {
		let hash = word.to_lowercase().bytes().fold(5_381_u64, |acc, byte| {
			acc.wrapping_mul(33) ^ u64::from(byte)
		});

		vector[(hash % DIMS as u64) as usize] += 1.0;
	}

	let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt().max(f32::EPSILON);

	vector.iter().map(|value| value / norm).collect()
}

fn test_config(postgres: Option<Postgres>) -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage { postgres, vector_dim: DIMS as u32 },
		providers: ProviderSettings {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/".to_string(),
				model: "hashed-words".to_string(),
				dimensions: DIMS as u32,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			rerank: RerankConfig::None,
		},
		chunking: Chunking {
			chunk_size: 400,
			overlap_budget: 80,
			boundary_window: 100,
			partial_window: 50,
			sentence_window: 3,
			embed_batch_size: 8,
		},
		retrieval: Retrieval {
			top_k: 5,
			candidate_k: 20,
			source_timeout_ms: 500,
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

fn in_memory_app() -> Router {
	let provider = Arc::new(HashedWords);
	let service = SageService::with_providers(
		test_config(None),
		Stores::in_memory(),
		Providers::new(provider.clone(), provider),
	);

	routes::router(AppState::from_service(service))
}

async fn call(app: &Router, method: &str, uri: &str, payload: Option<Value>) -> (StatusCode, Value) {
	let body = match payload {
		Some(payload) => Body::from(payload.to_string()),
		None => Body::empty(),
	};
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.method(method)
				.uri(uri)
				.header("content-type", "application/json")
				.body(body)
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call the router.");
	let status = response.status();
	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).expect("Failed to parse response.")
	};

	(status, json)
}

async fn wait_for_job(app: &Router, job_id: &str) -> Value {
	for _ in 0..100 {
		let (status, job) = call(app, "GET", &format!("/v1/jobs/{job_id}"), None).await;

		assert_eq!(status, StatusCode::OK);

		if job["status"] == "succeeded" || job["status"] == "failed" {
			return job;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	panic!("Job {job_id} did not finish.");
}

#[tokio::test]
async fn health_ok() {
	let app = in_memory_app();
	let (status, _) = call(&app, "GET", "/health", None).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn document_ingestion_runs_as_a_job_and_feeds_retrieval() {
	let app = in_memory_app();
	let text = "Photosynthesis converts light into chemical energy. Chlorophyll absorbs red and blue \
	            light. The Calvin cycle fixes carbon dioxide into sugars.";
	let (status, accepted) = call(
		&app,
		"POST",
		"/v1/documents",
		Some(json!({
			"session_id": "s1",
			"document_id": "biology",
			"file_name": "biology.md",
			"text": text
		})),
	)
	.await;

	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(accepted["status"], "queued");

	let job_id = accepted["job_id"].as_str().expect("Missing job id.").to_string();
	let job = wait_for_job(&app, &job_id).await;

	assert_eq!(job["status"], "succeeded");
	assert_eq!(job["result"]["chunk_count"], 1);

	let (status, retrieved) = call(
		&app,
		"POST",
		"/v1/retrieve",
		Some(json!({ "session_id": "s1", "query": "How does the Calvin cycle fix carbon dioxide?" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(retrieved["no_evidence"], false);
	assert_eq!(retrieved["ranking"]["status"], "similarity_only");
	assert_eq!(retrieved["candidates"][0]["source_kind"], "chunk");
}

#[tokio::test]
async fn feedback_round_trip_moves_the_profile() {
	let app = in_memory_app();
	let (status, interaction) = call(
		&app,
		"POST",
		"/v1/interactions",
		Some(json!({ "user_id": "u1", "session_id": "s1", "query": "What is osmosis?" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);

	let interaction_id = interaction["interaction_id"].clone();
	let (status, scored) = call(
		&app,
		"POST",
		"/v1/feedback",
		Some(json!({
			"user_id": "u1",
			"session_id": "s1",
			"interaction_id": interaction_id,
			"emoji": "\u{1F44D}",
			"understanding": 4
		})),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(scored["applied"], true);

	let (status, profile) = call(
		&app,
		"POST",
		"/v1/profile",
		Some(json!({ "user_id": "u1", "session_id": "s1" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(profile["persisted"], true);
	assert_eq!(profile["total_feedback_count"], 1);
	assert!(profile["comprehension_score"].as_f64().expect("Missing score.") > 50.0);
}

#[tokio::test]
async fn errors_map_to_status_codes_with_a_json_body() {
	let app = in_memory_app();
	let (status, body) = call(
		&app,
		"POST",
		"/v1/interactions",
		Some(json!({ "user_id": "u1", "session_id": "s1", "query": "Define entropy." })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);

	let interaction_id = body["interaction_id"].clone();
	let (status, body) = call(
		&app,
		"POST",
		"/v1/feedback",
		Some(json!({
			"user_id": "u1",
			"session_id": "s1",
			"interaction_id": interaction_id,
			"emoji": "\u{1F680}"
		})),
	)
	.await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "INVALID_REQUEST");

	let (status, body) = call(
		&app,
		"POST",
		"/v1/feedback",
		Some(json!({
			"user_id": "u2",
			"session_id": "s1",
			"interaction_id": interaction_id,
			"emoji": "\u{1F44D}"
		})),
	)
	.await;

	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["error_code"], "CONFLICT");

	let (status, body) =
		call(&app, "GET", "/v1/jobs/00000000-0000-0000-0000-000000000000", None).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error_code"], "NOT_FOUND");
	assert!(body["message"].as_str().is_some_and(|message| !message.is_empty()));
}

#[tokio::test]
async fn blank_documents_are_rejected_before_a_job_is_created() {
	let app = in_memory_app();
	let (status, body) = call(
		&app,
		"POST",
		"/v1/documents",
		Some(json!({
			"session_id": "s1",
			"document_id": "empty",
			"file_name": "empty.md",
			"text": "  "
		})),
	)
	.await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "INVALID_REQUEST");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SAGE_PG_DSN to run."]
async fn health_ok_with_postgres() {
	let Some(base_dsn) = sage_testkit::env_dsn() else {
		eprintln!("Skipping health_ok_with_postgres; set SAGE_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let config =
		test_config(Some(Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 }));
	let state = AppState::new(config).await.expect("Failed to initialize app state.");
	let app = routes::router(state);
	let (status, _) = call(&app, "GET", "/health", None).await;

	assert_eq!(status, StatusCode::OK);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
