use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};
use sage_config::ProviderConfig;

/// Scores `docs` against `query`. The result is aligned with `docs`; documents the provider left
/// out score 0.
pub async fn rerank(cfg: &ProviderConfig, query: &str, docs: &[String]) -> Result<Vec<f32>> {
	if docs.is_empty() {
		return Ok(Vec::new());
	}

	let headers = crate::auth_headers(&cfg.api_key, &cfg.default_headers)?;
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let res = client.post(url).headers(headers).json(&body).send().await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![0.0_f32; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing results array.".to_string(),
		})?;

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;

		if index < scores.len() && score.is_finite() {
			scores[index] = score;
		}
	}

	Ok(scores)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aligns_scores_by_index() {
		let json = serde_json::json!({
			"results": [
				{ "index": 1, "relevance_score": 0.2 },
				{ "index": 0, "relevance_score": 0.9 }
			]
		});
		let scores = parse_rerank_response(json, 2).expect("parse failed");

		assert_eq!(scores, vec![0.9, 0.2]);
	}

	#[test]
	fn accepts_data_alias_and_ignores_out_of_range_indices() {
		let json = serde_json::json!({
			"data": [
				{ "index": 0, "score": 0.4 },
				{ "index": 7, "score": 0.8 }
			]
		});
		let scores = parse_rerank_response(json, 2).expect("parse failed");

		assert_eq!(scores, vec![0.4, 0.0]);
	}

	#[test]
	fn missing_results_is_an_invalid_response() {
		let err = parse_rerank_response(serde_json::json!({}), 1).expect_err("Expected an error.");

		assert!(matches!(err, Error::InvalidResponse { .. }));
	}
}
