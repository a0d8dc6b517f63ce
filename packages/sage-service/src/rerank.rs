//! Reranking strategies. The strategy is fixed when the service is built; a strategy that cannot
//! score a request reports why instead of failing it.

use sage_config::{LocalRerank, ProviderConfig, RerankConfig};

use crate::{Providers, retrieval::EvidenceCandidate, text};

#[derive(Clone, Debug)]
pub enum Reranker {
	None,
	Local(LocalRerank),
	Remote(ProviderConfig),
}
impl Reranker {
	pub fn from_config(cfg: &RerankConfig) -> Self {
		match cfg {
			RerankConfig::None => Self::None,
			RerankConfig::Local(local) => Self::Local(local.clone()),
			RerankConfig::Remote(remote) => Self::Remote(remote.clone()),
		}
	}

	pub fn mode(&self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Local(_) => "local",
			Self::Remote(_) => "remote",
		}
	}

	/// Scores `candidates` against `query`. Scores are aligned with the input order.
	pub async fn rerank(
		&self,
		providers: &Providers,
		query: &str,
		candidates: &[EvidenceCandidate],
	) -> RerankOutcome {
		match self {
			Self::None => RerankOutcome::Skipped,
			Self::Local(cfg) => RerankOutcome::Scored(local_scores(cfg, query, candidates)),
			Self::Remote(cfg) => remote_scores(providers, cfg, query, candidates).await,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum RerankOutcome {
	/// No reranker is configured.
	Skipped,
	Scored(Vec<f32>),
	Unavailable { reason: String },
}

/// Blends retrieval similarity with query term coverage.
fn local_scores(cfg: &LocalRerank, query: &str, candidates: &[EvidenceCandidate]) -> Vec<f32> {
	let weight = cfg.lexical_weight.clamp(0.0, 1.0);
	let terms = text::query_terms(query, cfg.max_query_terms as usize);

	candidates
		.iter()
		.map(|candidate| {
			let lexical = text::lexical_overlap(&terms, &candidate.content);

			(1.0 - weight) * candidate.similarity + weight * lexical
		})
		.collect()
}

async fn remote_scores(
	providers: &Providers,
	cfg: &ProviderConfig,
	query: &str,
	candidates: &[EvidenceCandidate],
) -> RerankOutcome {
	if cfg.api_key.trim().is_empty() {
		return RerankOutcome::Unavailable {
			reason: "Reranker credentials are missing.".to_string(),
		};
	}

	let docs: Vec<String> = candidates.iter().map(|candidate| candidate.content.clone()).collect();

	match providers.rerank.rerank(cfg, query, &docs).await {
		Ok(scores) if scores.len() != docs.len() => RerankOutcome::Unavailable {
			reason: format!("Reranker returned {} scores for {} documents.", scores.len(), docs.len()),
		},
		Ok(scores) if scores.iter().any(|score| !score.is_finite()) => RerankOutcome::Unavailable {
			reason: "Reranker returned a non-finite score.".to_string(),
		},
		Ok(scores) => RerankOutcome::Scored(scores),
		Err(err) => RerankOutcome::Unavailable { reason: err.to_string() },
	}
}
