//! Hybrid evidence retrieval.
//!
//! One query fans out to the chunk, knowledge-base and QA-cache stores. Every source runs under
//! its own timeout inside the request deadline, so a slow source only costs its own candidates.
//! Raw cosine distances are normalised into similarities, filtered per source, ranked (by the
//! configured reranker when it can score, by similarity otherwise), deduplicated and truncated.

use std::{cmp::Ordering, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};

use crate::{
	BoxFuture, Error, Result, SageService,
	rerank::RerankOutcome,
	stores::{RawScore, SourceHit, SourceHits, SourceKind, SourceQuery},
	text,
};
use sage_config::{Adequacy, SourceThresholds};

#[derive(Clone, Debug, Deserialize)]
pub struct RetrieveRequest {
	pub session_id: String,
	pub query: String,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub thresholds: ThresholdOverrides,
}

/// Per-request replacements for the configured minimum similarities.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct ThresholdOverrides {
	pub chunk: Option<f32>,
	pub knowledge_base: Option<f32>,
	pub qa_pair: Option<f32>,
}
impl ThresholdOverrides {
	fn resolve(&self, base: SourceThresholds) -> Result<SourceThresholds> {
		let resolved = SourceThresholds {
			chunk: self.chunk.unwrap_or(base.chunk),
			knowledge_base: self.knowledge_base.unwrap_or(base.knowledge_base),
			qa_pair: self.qa_pair.unwrap_or(base.qa_pair),
		};

		for (name, value) in [
			("thresholds.chunk", resolved.chunk),
			("thresholds.knowledge_base", resolved.knowledge_base),
			("thresholds.qa_pair", resolved.qa_pair),
		] {
			if !(0.0..=1.0).contains(&value) {
				return Err(Error::invalid(format!("{name} must be in the range 0.0-1.0.")));
			}
		}

		Ok(resolved)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvidenceCandidate {
	pub source_kind: SourceKind,
	pub source_ref: String,
	pub content: String,
	/// File name, topic or cached question, depending on the source.
	pub label: Option<String>,
	pub raw_score: RawScore,
	/// Normalised to `[0, 1]`, higher is closer.
	pub similarity: f32,
	/// Ranking score. Equal to `similarity` unless a reranker scored the candidate.
	pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCompleteness {
	Complete,
	/// At least one source failed or timed out. Candidates come from the sources that answered.
	Partial,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RankingStatus {
	Reranked { mode: String },
	SimilarityOnly,
	/// A reranker is configured but could not score this request.
	Unranked { reason: String },
}

/// Adequacy of the evidence for answering without a corrective step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
	Sufficient,
	Ambiguous,
	Insufficient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
	Ok,
	TimedOut,
	Failed,
	/// The request deadline passed before the source was asked.
	Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceReport {
	pub source: SourceKind,
	pub status: SourceStatus,
	pub returned: usize,
	/// Hits whose vectors came from another embedding model.
	pub stale_excluded: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrieveResponse {
	pub candidates: Vec<EvidenceCandidate>,
	pub no_evidence: bool,
	pub completeness: EvidenceCompleteness,
	pub ranking: RankingStatus,
	pub verdict: Verdict,
	pub stale_qa_excluded: usize,
	pub sources: Vec<SourceReport>,
}
impl RetrieveResponse {
	fn empty(completeness: EvidenceCompleteness, sources: Vec<SourceReport>) -> Self {
		Self {
			candidates: Vec::new(),
			no_evidence: true,
			completeness,
			ranking: RankingStatus::SimilarityOnly,
			verdict: Verdict::Insufficient,
			stale_qa_excluded: 0,
			sources,
		}
	}
}

impl SageService {
	pub async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
		let retrieval = &self.cfg.retrieval;

		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("query", &req.query)?;

		let top_k = req.top_k.unwrap_or(retrieval.top_k);

		if top_k == 0 {
			return Err(Error::invalid("top_k must be greater than zero."));
		}

		let thresholds = req.thresholds.resolve(retrieval.thresholds)?;
		let started = Instant::now();
		let deadline = started + Duration::from_millis(retrieval.request_timeout_ms);
		let vector = match time::timeout_at(deadline, self.embed_one(&req.query)).await {
			Ok(result) => result?,
			Err(_) => {
				tracing::warn!(
					session_id = %req.session_id,
					timeout_ms = retrieval.request_timeout_ms,
					"Query embedding exceeded the request deadline."
				);

				let sources = SourceKind::ALL
					.into_iter()
					.map(|source| SourceReport {
						source,
						status: SourceStatus::Skipped,
						returned: 0,
						stale_excluded: 0,
					})
					.collect();

				return Ok(RetrieveResponse::empty(EvidenceCompleteness::Partial, sources));
			},
		};
		let terms = text::query_terms(&req.query, retrieval.knowledge_base.max_query_terms as usize);
		let query = SourceQuery {
			session_id: &req.session_id,
			embedding_model_id: self.embedding_model_id(),
			text: &req.query,
			terms: &terms,
			vector: &vector,
		};
		let limit = retrieval.candidate_k as usize;
		let source_deadline =
			deadline.min(Instant::now() + Duration::from_millis(retrieval.source_timeout_ms));
		let (chunk_hits, kb_hits, qa_hits) = tokio::join!(
			gather(SourceKind::Chunk, source_deadline, self.stores.chunks.search(query, limit)),
			gather(
				SourceKind::KnowledgeBase,
				source_deadline,
				self.stores.knowledge.search(query, limit),
			),
			gather(SourceKind::QaPair, source_deadline, self.stores.qa.search(query, limit)),
		);
		let mut sources = Vec::with_capacity(3);
		let mut candidates = Vec::new();

		for (mut report, hits) in [chunk_hits, kb_hits, qa_hits] {
			let threshold = match report.source {
				SourceKind::Chunk => thresholds.chunk,
				SourceKind::KnowledgeBase => thresholds.knowledge_base,
				SourceKind::QaPair => thresholds.qa_pair,
			};

			for hit in hits {
				if hit.embedding_model_id != self.embedding_model_id() {
					report.stale_excluded += 1;

					continue;
				}
				if let Some(candidate) = self.admit(report.source, hit, &terms, threshold) {
					candidates.push(candidate);
				}
			}

			if report.stale_excluded > 0 {
				tracing::warn!(
					source = report.source.as_str(),
					excluded = report.stale_excluded,
					expected_model = self.embedding_model_id(),
					"Excluded candidates embedded with a different model."
				);
			}

			sources.push(report);
		}

		let stale_qa_excluded: usize = sources
			.iter()
			.filter(|report| report.source == SourceKind::QaPair)
			.map(|report| report.stale_excluded)
			.sum();
		let completeness = if sources.iter().all(|report| report.status == SourceStatus::Ok) {
			EvidenceCompleteness::Complete
		} else {
			EvidenceCompleteness::Partial
		};

		if candidates.is_empty() {
			tracing::info!(
				session_id = %req.session_id,
				elapsed_ms = started.elapsed().as_millis() as u64,
				"No evidence found."
			);

			let mut response = RetrieveResponse::empty(completeness, sources);

			response.stale_qa_excluded = stale_qa_excluded;

			return Ok(response);
		}

		candidates.sort_by(|a, b| rank_order(a.similarity, b.similarity, a, b));

		let ranking = self.apply_rerank(&req.query, &mut candidates, deadline).await;
		let before_dedup = candidates.len();
		let candidates = dedup(candidates, retrieval.dedup_threshold, top_k as usize);
		let verdict = judge(&retrieval.adequacy, &candidates);

		tracing::info!(
			session_id = %req.session_id,
			merged = before_dedup,
			returned = candidates.len(),
			verdict = ?verdict,
			completeness = ?completeness,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"Evidence retrieved."
		);

		Ok(RetrieveResponse {
			no_evidence: candidates.is_empty(),
			candidates,
			completeness,
			ranking,
			verdict,
			stale_qa_excluded,
			sources,
		})
	}

	fn admit(
		&self,
		source: SourceKind,
		hit: SourceHit,
		terms: &[String],
		threshold: f32,
	) -> Option<EvidenceCandidate> {
		if hit.content.trim().is_empty() {
			return None;
		}

		let mut similarity = similarity_from_raw(hit.raw_score);

		if source == SourceKind::KnowledgeBase {
			let keyword_text = match &hit.label {
				Some(topic) => format!("{topic} {}", hit.content),
				None => hit.content.clone(),
			};
			let keyword = self.cfg.retrieval.knowledge_base.keyword_weight
				* text::lexical_overlap(terms, &keyword_text);

			similarity = similarity.max(keyword.clamp(0.0, 1.0));
		}

		if similarity <= 0.0 || similarity < threshold {
			return None;
		}

		Some(EvidenceCandidate {
			source_kind: source,
			source_ref: hit.source_ref,
			content: hit.content,
			label: hit.label,
			raw_score: hit.raw_score,
			similarity,
			score: similarity,
		})
	}

	async fn apply_rerank(
		&self,
		query: &str,
		candidates: &mut [EvidenceCandidate],
		deadline: Instant,
	) -> RankingStatus {
		let budget = deadline
			.saturating_duration_since(Instant::now())
			.min(Duration::from_millis(self.cfg.retrieval.rerank_timeout_ms));
		let outcome =
			match time::timeout(budget, self.reranker.rerank(&self.providers, query, candidates))
				.await
			{
				Ok(outcome) => outcome,
				Err(_) => RerankOutcome::Unavailable { reason: "Reranker timed out.".to_string() },
			};

		match outcome {
			RerankOutcome::Skipped => RankingStatus::SimilarityOnly,
			RerankOutcome::Scored(scores) => {
				for (candidate, score) in candidates.iter_mut().zip(scores) {
					candidate.score = score;
				}

				candidates.sort_by(|a, b| rank_order(a.score, b.score, a, b));

				RankingStatus::Reranked { mode: self.reranker.mode().to_string() }
			},
			RerankOutcome::Unavailable { reason } => {
				tracing::warn!(
					mode = self.reranker.mode(),
					reason = %reason,
					"Reranker unavailable. Keeping similarity order."
				);

				RankingStatus::Unranked { reason }
			},
		}
	}
}

/// `similarity = max(0, 1 - d)` for cosine distance `d`, capped at 1.0.
pub fn similarity_from_raw(raw: RawScore) -> f32 {
	match raw {
		RawScore::CosineDistance(distance) if distance.is_finite() =>
			(1.0 - distance).clamp(0.0, 1.0) as f32,
		RawScore::CosineDistance(_) => 0.0,
	}
}

/// Drops every candidate whose content overlaps an already kept, higher-ranked candidate at or
/// above `threshold`, then keeps the first `top_k`.
pub fn dedup(
	candidates: Vec<EvidenceCandidate>,
	threshold: f32,
	top_k: usize,
) -> Vec<EvidenceCandidate> {
	let mut kept: Vec<(String, EvidenceCandidate)> = Vec::with_capacity(top_k);

	for candidate in candidates {
		if kept.len() >= top_k {
			break;
		}

		let fingerprint = text::fingerprint(&candidate.content);
		let duplicate = kept.iter().any(|(other_fingerprint, other)| {
			*other_fingerprint == fingerprint
				|| text::multiset_overlap(&candidate.content, &other.content) >= threshold
		});

		if duplicate {
			tracing::debug!(
				source = candidate.source_kind.as_str(),
				source_ref = %candidate.source_ref,
				"Dropped near-duplicate candidate."
			);

			continue;
		}

		kept.push((fingerprint, candidate));
	}

	kept.into_iter().map(|(_, candidate)| candidate).collect()
}

pub fn judge(cfg: &Adequacy, candidates: &[EvidenceCandidate]) -> Verdict {
	let top = candidates.iter().map(|candidate| candidate.similarity).fold(0.0_f32, f32::max);

	if candidates.len() < cfg.min_candidates.max(1) as usize || top < cfg.ambiguous_top_score {
		return Verdict::Insufficient;
	}
	if top < cfg.min_top_score {
		return Verdict::Ambiguous;
	}

	Verdict::Sufficient
}

async fn gather(
	source: SourceKind,
	deadline: Instant,
	search: BoxFuture<'_, Result<SourceHits>>,
) -> (SourceReport, Vec<SourceHit>) {
	let mut report = SourceReport { source, status: SourceStatus::Ok, returned: 0, stale_excluded: 0 };

	if Instant::now() >= deadline {
		report.status = SourceStatus::Skipped;

		return (report, Vec::new());
	}

	match time::timeout_at(deadline, search).await {
		Ok(Ok(SourceHits { hits, stale_excluded })) => {
			report.returned = hits.len();
			report.stale_excluded = stale_excluded;

			(report, hits)
		},
		Ok(Err(err)) => {
			tracing::warn!(source = source.as_str(), error = %err, "Retrieval source failed.");

			report.status = SourceStatus::Failed;

			(report, Vec::new())
		},
		Err(_) => {
			tracing::warn!(source = source.as_str(), "Retrieval source timed out.");

			report.status = SourceStatus::TimedOut;

			(report, Vec::new())
		},
	}
}

/// Higher score first. Ties go to QA pairs, then knowledge entries, then chunks, then by
/// reference, so identical inputs always produce the same order.
fn rank_order(
	a_score: f32,
	b_score: f32,
	a: &EvidenceCandidate,
	b: &EvidenceCandidate,
) -> Ordering {
	b_score
		.total_cmp(&a_score)
		.then_with(|| source_priority(a.source_kind).cmp(&source_priority(b.source_kind)))
		.then_with(|| a.source_ref.cmp(&b.source_ref))
}

fn source_priority(kind: SourceKind) -> u8 {
	match kind {
		SourceKind::QaPair => 0,
		SourceKind::KnowledgeBase => 1,
		SourceKind::Chunk => 2,
	}
}

#[cfg(test)]
mod tests {
	use sage_config::Adequacy;

	use crate::{
		retrieval::{EvidenceCandidate, Verdict, dedup, judge, similarity_from_raw},
		stores::{RawScore, SourceKind},
	};

	fn candidate(source_ref: &str, content: &str, similarity: f32) -> EvidenceCandidate {
		EvidenceCandidate {
			source_kind: SourceKind::Chunk,
			source_ref: source_ref.to_string(),
			content: content.to_string(),
			label: None,
			raw_score: RawScore::CosineDistance(f64::from(1.0 - similarity)),
			similarity,
			score: similarity,
		}
	}

	#[test]
	fn cosine_distance_maps_into_unit_range() {
		let exact = similarity_from_raw(RawScore::CosineDistance(0.0));

		assert!((0.95..=1.0).contains(&exact));
		assert_eq!(similarity_from_raw(RawScore::CosineDistance(1.0)), 0.0);
		assert_eq!(similarity_from_raw(RawScore::CosineDistance(1.7)), 0.0);
		assert_eq!(similarity_from_raw(RawScore::CosineDistance(-0.000_1)), 1.0);
		assert_eq!(similarity_from_raw(RawScore::CosineDistance(f64::NAN)), 0.0);
	}

	#[test]
	fn near_identical_content_keeps_the_higher_ranked_copy() {
		let words: Vec<String> = (0..40).map(|idx| format!("word{idx}")).collect();
		let base = words.join(" ");
		let variant = format!("{base} extra");
		let kept = dedup(
			vec![
				candidate("a", &base, 0.9),
				candidate("b", &variant, 0.8),
				candidate("c", "Something else entirely.", 0.7),
			],
			0.95,
			10,
		);
		let refs: Vec<&str> = kept.iter().map(|candidate| candidate.source_ref.as_str()).collect();

		assert_eq!(refs, vec!["a", "c"]);
	}

	#[test]
	fn dedup_truncates_to_top_k() {
		let kept = dedup(
			vec![
				candidate("a", "alpha beta", 0.9),
				candidate("b", "gamma delta", 0.8),
				candidate("c", "epsilon zeta", 0.7),
			],
			0.95,
			2,
		);

		assert_eq!(kept.len(), 2);
	}

	#[test]
	fn adequacy_follows_top_similarity() {
		let cfg = Adequacy { min_candidates: 1, min_top_score: 0.55, ambiguous_top_score: 0.35 };

		assert_eq!(judge(&cfg, &[]), Verdict::Insufficient);
		assert_eq!(judge(&cfg, &[candidate("a", "x", 0.3)]), Verdict::Insufficient);
		assert_eq!(judge(&cfg, &[candidate("a", "x", 0.4)]), Verdict::Ambiguous);
		assert_eq!(judge(&cfg, &[candidate("a", "x", 0.55)]), Verdict::Sufficient);
	}
}
