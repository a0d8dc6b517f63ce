//! Document ingestion plus the audit and improve operations over stored chunks.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, SageService, stores::ChunkRecord};
use sage_chunking::{Chunk, ChunkingConfig, OverlapKind, RepairReport};

const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5a9e_c4d1_7b2f_4e8a_9c03_61d2_b7f4_a0e5);

#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
	pub session_id: String,
	pub document_id: String,
	pub file_name: String,
	pub text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestResponse {
	pub document_id: String,
	pub chunk_count: usize,
	pub chunk_ids: Vec<Uuid>,
	pub repair_report: RepairReport,
	pub embedding_model_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuditRequest {
	pub session_id: String,
	pub document_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
	pub earlier_chunk_id: Uuid,
	pub later_chunk_id: Uuid,
	pub kind: OverlapKind,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditResponse {
	pub document_id: String,
	pub pairs_checked: usize,
	pub findings: Vec<AuditFinding>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ImproveChunkRequest {
	pub chunk_id: Uuid,
	pub text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ImproveChunkResponse {
	pub chunk_id: Uuid,
	pub embedding_model_id: String,
	/// Overlap flags the rewrite cleared.
	pub cleared_flags: Vec<String>,
	/// Flags the rewritten text still earns against its predecessor.
	pub flags: Vec<String>,
	/// The following chunk, when its context prefix was rebuilt and re-embedded.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refreshed_neighbour: Option<Uuid>,
}

impl SageService {
	/// Splits, repairs and embeds a document, then replaces any earlier version of it in one
	/// commit.
	pub async fn ingest_document(&self, req: IngestRequest) -> Result<IngestResponse> {
		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("document_id", &req.document_id)?;
		crate::require_text("text", &req.text)?;

		let chunking_cfg = self.chunking_config();
		let resolved = sage_chunking::resolve(&req.text, &chunking_cfg);

		validate_ordinals(&resolved.chunks)?;

		let inputs: Vec<String> = resolved.chunks.iter().map(Chunk::embedding_input).collect();
		let vectors = self.embed_all(&inputs).await?;
		let now = OffsetDateTime::now_utc();
		let mut records = Vec::with_capacity(resolved.chunks.len());

		for (chunk, vector) in resolved.chunks.into_iter().zip(vectors) {
			let record = ChunkRecord {
				chunk_id: chunk_id(&req.session_id, &req.document_id, chunk.ordinal_index),
				session_id: req.session_id.clone(),
				document_id: req.document_id.clone(),
				ordinal_index: chunk.ordinal_index,
				text: chunk.text,
				context_prefix: chunk.context_prefix,
				source_file_name: req.file_name.clone(),
				embedding_model_id: self.embedding_model_id().to_string(),
				overlap_flags: Vec::new(),
				created_at: now,
				updated_at: now,
			};

			records.push((record, vector));
		}

		let chunk_ids = records.iter().map(|(record, _)| record.chunk_id).collect::<Vec<_>>();

		self.stores.chunks.replace_document(&req.session_id, &req.document_id, records).await?;

		tracing::info!(
			session_id = %req.session_id,
			document_id = %req.document_id,
			chunks = chunk_ids.len(),
			repairs = resolved.report.repairs.len(),
			removed_chars = resolved.report.removed_chars(),
			"Document ingested."
		);

		Ok(IngestResponse {
			document_id: req.document_id,
			chunk_count: chunk_ids.len(),
			chunk_ids,
			repair_report: resolved.report,
			embedding_model_id: self.embedding_model_id().to_string(),
		})
	}

	/// Re-checks every adjacent pair of a stored document and records the findings on the later
	/// chunk of each pair. Texts are left untouched.
	pub async fn audit_document(&self, req: AuditRequest) -> Result<AuditResponse> {
		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("document_id", &req.document_id)?;

		let chunks = self.stores.chunks.list_document(&req.session_id, &req.document_id).await?;

		if chunks.is_empty() {
			return Err(Error::NotFound {
				message: format!("Document {} has no chunks in this session.", req.document_id),
			});
		}

		let findings = self.reflag(&chunks).await?;

		if !findings.is_empty() {
			tracing::warn!(
				document_id = %req.document_id,
				findings = findings.len(),
				"Chunk audit found overlapping boundaries."
			);
		}

		Ok(AuditResponse {
			document_id: req.document_id,
			pairs_checked: chunks.len().saturating_sub(1),
			findings,
		})
	}

	/// Rewrites one chunk and re-embeds it with the current model. The following chunk gets a
	/// context prefix built from the new text, and the flags of every pair in the document are
	/// recomputed.
	pub async fn improve_chunk(&self, req: ImproveChunkRequest) -> Result<ImproveChunkResponse> {
		crate::require_text("text", &req.text)?;

		let Some(existing) = self.stores.chunks.get(req.chunk_id).await? else {
			return Err(Error::NotFound { message: format!("Chunk {} does not exist.", req.chunk_id) });
		};
		let text = req.text.trim().to_string();
		let input = Chunk {
			ordinal_index: existing.ordinal_index,
			text: text.clone(),
			context_prefix: existing.context_prefix.clone(),
		}
		.embedding_input();
		let vector = self.embed_one(&input).await?;
		let now = OffsetDateTime::now_utc();

		self.stores
			.chunks
			.rewrite(
				req.chunk_id,
				&text,
				&existing.context_prefix,
				vector,
				self.embedding_model_id(),
				now,
			)
			.await?;

		let mut chunks =
			self.stores.chunks.list_document(&existing.session_id, &existing.document_id).await?;
		let mut refreshed_neighbour = None;

		if let Some(next) =
			chunks.iter_mut().find(|chunk| chunk.ordinal_index == existing.ordinal_index + 1)
		{
			let prefix = sage_chunking::context_prefix(&text, self.cfg.chunking.overlap_budget);

			if prefix != next.context_prefix {
				let input = Chunk {
					ordinal_index: next.ordinal_index,
					text: next.text.clone(),
					context_prefix: prefix.clone(),
				}
				.embedding_input();
				let vector = self.embed_one(&input).await?;

				self.stores
					.chunks
					.rewrite(
						next.chunk_id,
						&next.text,
						&prefix,
						vector,
						self.embedding_model_id(),
						now,
					)
					.await?;

				next.context_prefix = prefix;
				next.embedding_model_id = self.embedding_model_id().to_string();
				next.overlap_flags.clear();
				refreshed_neighbour = Some(next.chunk_id);
			}
		}

		let findings = self.reflag(&chunks).await?;
		let flags = findings
			.iter()
			.filter(|finding| finding.later_chunk_id == req.chunk_id)
			.map(|finding| finding.kind.as_str().to_string())
			.collect::<Vec<_>>();

		tracing::info!(
			chunk_id = %req.chunk_id,
			cleared_flags = existing.overlap_flags.len(),
			remaining_flags = flags.len(),
			refreshed_neighbour = refreshed_neighbour.is_some(),
			"Chunk rewritten."
		);

		Ok(ImproveChunkResponse {
			chunk_id: req.chunk_id,
			embedding_model_id: self.embedding_model_id().to_string(),
			cleared_flags: existing.overlap_flags,
			flags,
			refreshed_neighbour,
		})
	}

	/// Audits every adjacent pair of `chunks` and stores the findings as flags on the later chunk
	/// of each pair. Only chunks whose flags changed are written.
	async fn reflag(&self, chunks: &[ChunkRecord]) -> Result<Vec<AuditFinding>> {
		let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
		let raw = sage_chunking::audit(&texts, &self.chunking_config());
		let mut flags: Vec<Vec<String>> = vec![Vec::new(); chunks.len()];
		let mut findings = Vec::with_capacity(raw.len());

		for finding in raw {
			let later = finding.left_position + 1;

			flags[later].push(finding.kind.as_str().to_string());
			findings.push(AuditFinding {
				earlier_chunk_id: chunks[finding.left_position].chunk_id,
				later_chunk_id: chunks[later].chunk_id,
				kind: finding.kind,
			});
		}

		let updates = chunks
			.iter()
			.zip(flags)
			.filter(|(chunk, flags)| chunk.overlap_flags != *flags)
			.map(|(chunk, flags)| (chunk.chunk_id, flags))
			.collect::<Vec<_>>();

		if !updates.is_empty() {
			self.stores.chunks.set_overlap_flags(updates, OffsetDateTime::now_utc()).await?;
		}

		Ok(findings)
	}

	fn chunking_config(&self) -> ChunkingConfig {
		let cfg = &self.cfg.chunking;

		ChunkingConfig {
			chunk_size: cfg.chunk_size,
			overlap_budget: cfg.overlap_budget,
			boundary_window: cfg.boundary_window,
			partial_window: cfg.partial_window,
			sentence_window: cfg.sentence_window,
		}
	}
}

/// Ordinals of one document must run 0, 1, 2, ... without gaps or repeats.
pub fn validate_ordinals(chunks: &[Chunk]) -> Result<()> {
	for (expected, chunk) in chunks.iter().enumerate() {
		if chunk.ordinal_index != expected as i32 {
			return Err(Error::Conflict {
				message: format!(
					"Chunk ordinal {} found where {expected} was expected.",
					chunk.ordinal_index
				),
			});
		}
	}

	Ok(())
}

/// Deterministic per (session, document, ordinal), so re-ingesting a document reuses its ids.
pub fn chunk_id(session_id: &str, document_id: &str, ordinal_index: i32) -> Uuid {
	Uuid::new_v5(
		&CHUNK_ID_NAMESPACE,
		format!("{session_id}\u{1f}{document_id}\u{1f}{ordinal_index}").as_bytes(),
	)
}
