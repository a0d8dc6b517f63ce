use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

use sage_config::ProviderConfig;
use sage_providers::Error;

fn remote_rerank(api_key: &str) -> ProviderConfig {
	ProviderConfig {
		provider_id: "jina".to_string(),
		api_base: "http://127.0.0.1:9".to_string(),
		api_key: api_key.to_string(),
		path: "/v1/rerank".to_string(),
		model: "reranker".to_string(),
		timeout_ms: 200,
		default_headers: Map::new(),
	}
}

#[test]
fn builds_bearer_auth_header() {
	let headers =
		sage_providers::auth_headers("secret", &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn default_headers_must_be_strings() {
	let mut default_headers = Map::new();

	default_headers.insert("x-tenant".to_string(), Value::from(42));

	let err = sage_providers::auth_headers("secret", &default_headers)
		.expect_err("Non-string header must be rejected.");

	assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
	let cfg = remote_rerank("");
	let err = sage_providers::rerank::rerank(&cfg, "query", &["doc".to_string()])
		.await
		.expect_err("Empty api_key must be rejected.");

	assert!(matches!(err, Error::InvalidConfig { .. }));
	assert!(!err.is_transient());
}

#[tokio::test]
async fn empty_batches_skip_the_network() {
	let cfg = remote_rerank("secret");
	let scores =
		sage_providers::rerank::rerank(&cfg, "query", &[]).await.expect("Empty batch must succeed.");

	assert!(scores.is_empty());
}
