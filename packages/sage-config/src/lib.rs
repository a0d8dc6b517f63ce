mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Adequacy, Chunking, Config, Ebars, EmbeddingProviderConfig, Jobs, KnowledgeBaseLookup,
	LevelThresholds, LocalRerank, Postgres, ProviderConfig, Providers, RerankConfig, Retrieval,
	Service, SourceThresholds, Storage,
};

use std::{fs, path::Path};

/// Longest retention for finished ingestion jobs: 30 days.
pub const MAX_JOB_TTL_SECS: u64 = 30 * 24 * 60 * 60;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.vector_dim.".to_string(),
		});
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider embedding api_key must be non-empty.".to_string(),
		});
	}
	if let Some(postgres) = cfg.storage.postgres.as_ref()
		&& postgres.pool_max_conns == 0
	{
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if let RerankConfig::Local(local) = &cfg.providers.rerank
		&& !(0.0..=1.0).contains(&local.lexical_weight)
	{
		return Err(Error::Validation {
			message: "providers.rerank.lexical_weight must be in the range 0.0-1.0.".to_string(),
		});
	}

	validate_chunking(&cfg.chunking)?;
	validate_retrieval(&cfg.retrieval)?;
	validate_ebars(&cfg.ebars)?;

	if cfg.jobs.ttl_secs == 0 || cfg.jobs.ttl_secs > MAX_JOB_TTL_SECS {
		return Err(Error::Validation {
			message: format!("jobs.ttl_secs must be between 1 and {MAX_JOB_TTL_SECS}."),
		});
	}
	if cfg.jobs.sweep_interval_secs == 0 {
		return Err(Error::Validation {
			message: "jobs.sweep_interval_secs must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_chunking(chunking: &Chunking) -> Result<()> {
	if chunking.chunk_size == 0 {
		return Err(Error::Validation {
			message: "chunking.chunk_size must be greater than zero.".to_string(),
		});
	}
	if chunking.overlap_budget >= chunking.chunk_size {
		return Err(Error::Validation {
			message: "chunking.overlap_budget must be less than chunking.chunk_size.".to_string(),
		});
	}
	if chunking.boundary_window == 0 {
		return Err(Error::Validation {
			message: "chunking.boundary_window must be greater than zero.".to_string(),
		});
	}
	if chunking.partial_window == 0 || chunking.partial_window > chunking.boundary_window {
		return Err(Error::Validation {
			message: "chunking.partial_window must be between 1 and chunking.boundary_window."
				.to_string(),
		});
	}
	if chunking.sentence_window == 0 {
		return Err(Error::Validation {
			message: "chunking.sentence_window must be greater than zero.".to_string(),
		});
	}
	if chunking.embed_batch_size == 0 {
		return Err(Error::Validation {
			message: "chunking.embed_batch_size must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_retrieval(retrieval: &Retrieval) -> Result<()> {
	if retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if retrieval.candidate_k < retrieval.top_k {
		return Err(Error::Validation {
			message: "retrieval.candidate_k must be greater than or equal to retrieval.top_k."
				.to_string(),
		});
	}

	for (label, value) in [
		("retrieval.source_timeout_ms", retrieval.source_timeout_ms),
		("retrieval.request_timeout_ms", retrieval.request_timeout_ms),
		("retrieval.rerank_timeout_ms", retrieval.rerank_timeout_ms),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	if retrieval.source_timeout_ms > retrieval.request_timeout_ms {
		return Err(Error::Validation {
			message: "retrieval.source_timeout_ms must not exceed retrieval.request_timeout_ms."
				.to_string(),
		});
	}
	if !retrieval.dedup_threshold.is_finite()
		|| retrieval.dedup_threshold <= 0.0
		|| retrieval.dedup_threshold > 1.0
	{
		return Err(Error::Validation {
			message: "retrieval.dedup_threshold must be in the range (0.0, 1.0].".to_string(),
		});
	}

	for (label, value) in [
		("retrieval.thresholds.chunk", retrieval.thresholds.chunk),
		("retrieval.thresholds.knowledge_base", retrieval.thresholds.knowledge_base),
		("retrieval.thresholds.qa_pair", retrieval.thresholds.qa_pair),
		("retrieval.knowledge_base.keyword_weight", retrieval.knowledge_base.keyword_weight),
		("retrieval.adequacy.min_top_score", retrieval.adequacy.min_top_score),
		("retrieval.adequacy.ambiguous_top_score", retrieval.adequacy.ambiguous_top_score),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if retrieval.adequacy.ambiguous_top_score > retrieval.adequacy.min_top_score {
		return Err(Error::Validation {
			message: "retrieval.adequacy.ambiguous_top_score must not exceed retrieval.adequacy.min_top_score."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_ebars(ebars: &Ebars) -> Result<()> {
	for (label, value) in [
		("ebars.min_score", ebars.min_score),
		("ebars.max_score", ebars.max_score),
		("ebars.initial_score", ebars.initial_score),
		("ebars.max_step", ebars.max_step),
		("ebars.min_sensitivity", ebars.min_sensitivity),
		("ebars.warmup_events", ebars.warmup_events),
		("ebars.thresholds.struggling", ebars.thresholds.struggling),
		("ebars.thresholds.normal", ebars.thresholds.normal),
		("ebars.thresholds.good", ebars.thresholds.good),
		("ebars.thresholds.excellent", ebars.thresholds.excellent),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
	}

	if ebars.min_score >= ebars.max_score {
		return Err(Error::Validation {
			message: "ebars.min_score must be less than ebars.max_score.".to_string(),
		});
	}
	if !(ebars.min_score..=ebars.max_score).contains(&ebars.initial_score) {
		return Err(Error::Validation {
			message: "ebars.initial_score must lie within the score range.".to_string(),
		});
	}
	if ebars.max_step <= 0.0 {
		return Err(Error::Validation {
			message: "ebars.max_step must be greater than zero.".to_string(),
		});
	}
	if ebars.min_sensitivity <= 0.0 || ebars.min_sensitivity > 1.0 {
		return Err(Error::Validation {
			message: "ebars.min_sensitivity must be in the range (0.0, 1.0].".to_string(),
		});
	}
	if ebars.warmup_events <= 0.0 {
		return Err(Error::Validation {
			message: "ebars.warmup_events must be greater than zero.".to_string(),
		});
	}

	let t = &ebars.thresholds;
	let bounds = [ebars.min_score, t.struggling, t.normal, t.good, t.excellent, ebars.max_score];

	if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
		return Err(Error::Validation {
			message: "ebars.thresholds must be strictly increasing inside the score range."
				.to_string(),
		});
	}

	// Interior buckets must be wider than one step so an event crosses at most one boundary.
	let narrowest = bounds[1..5].windows(2).map(|pair| pair[1] - pair[0]).fold(f32::MAX, f32::min);

	if ebars.max_step >= narrowest {
		return Err(Error::Validation {
			message: "ebars.max_step must be smaller than the narrowest interior level width."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.service.log_level.trim().is_empty() {
		cfg.service.log_level = "info".to_string();
	}
	if let RerankConfig::Remote(remote) = &mut cfg.providers.rerank {
		remote.api_key = remote.api_key.trim().to_string();
	}
}
