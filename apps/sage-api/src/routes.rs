use axum::{
	Json, Router,
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::AppState;
use sage_service::{
	AuditRequest, AuditResponse, CacheAnswerRequest, CacheAnswerResponse, Error, FeedbackRequest,
	ImproveChunkRequest, ImproveChunkResponse, IngestJob, IngestRequest, InteractionRequest,
	InteractionResponse, JobStatus, KnowledgeEntryRequest, KnowledgeEntryResponse, LearnerProfile,
	OutcomeRequest, ProfileRequest, RetrieveRequest, RetrieveResponse, ScoreResponse,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/documents", post(submit_document))
		.route("/v1/jobs/{job_id}", get(get_job))
		.route("/v1/documents/audit", post(audit_document))
		.route("/v1/chunks/improve", post(improve_chunk))
		.route("/v1/knowledge", post(add_knowledge))
		.route("/v1/qa_cache", post(cache_answer))
		.route("/v1/retrieve", post(retrieve))
		.route("/v1/interactions", post(record_interaction))
		.route("/v1/feedback", post(submit_feedback))
		.route("/v1/outcomes", post(record_outcome))
		.route("/v1/profile", post(learner_profile))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

#[derive(Debug, Serialize)]
struct JobAccepted {
	job_id: Uuid,
	status: JobStatus,
}

/// Accepts a document and ingests it in the background. Poll `/v1/jobs/{job_id}` for the result.
async fn submit_document(
	State(state): State<AppState>,
	Json(payload): Json<IngestRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
	if payload.text.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "text must not be empty.".to_string() }.into());
	}

	let job = state.jobs.create(&payload.session_id, &payload.document_id, OffsetDateTime::now_utc());
	let accepted = JobAccepted { job_id: job.job_id, status: job.status };

	tokio::spawn(run_ingest_job(state, job.job_id, payload));

	Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn run_ingest_job(state: AppState, job_id: Uuid, payload: IngestRequest) {
	if let Err(err) = state.jobs.mark_running(job_id, OffsetDateTime::now_utc()) {
		tracing::warn!(%job_id, error = %err, "Ingestion job could not start.");

		return;
	}

	let outcome = match state.service.ingest_document(payload).await {
		Ok(response) => state.jobs.succeed(job_id, response, OffsetDateTime::now_utc()),
		Err(err) => {
			tracing::warn!(%job_id, error_code = err.code(), error = %err, "Ingestion job failed.");

			state.jobs.fail(job_id, &err, OffsetDateTime::now_utc())
		},
	};

	if let Err(err) = outcome {
		tracing::warn!(%job_id, error = %err, "Ingestion job result was not recorded.");
	}
}

async fn get_job(
	State(state): State<AppState>,
	Path(job_id): Path<Uuid>,
) -> Result<Json<IngestJob>, ApiError> {
	let job = state.jobs.get(job_id).ok_or_else(|| Error::NotFound {
		message: format!("Job {job_id} does not exist or has expired."),
	})?;

	Ok(Json(job))
}

async fn audit_document(
	State(state): State<AppState>,
	Json(payload): Json<AuditRequest>,
) -> Result<Json<AuditResponse>, ApiError> {
	let response = state.service.audit_document(payload).await?;

	Ok(Json(response))
}

async fn improve_chunk(
	State(state): State<AppState>,
	Json(payload): Json<ImproveChunkRequest>,
) -> Result<Json<ImproveChunkResponse>, ApiError> {
	let response = state.service.improve_chunk(payload).await?;

	Ok(Json(response))
}

async fn add_knowledge(
	State(state): State<AppState>,
	Json(payload): Json<KnowledgeEntryRequest>,
) -> Result<Json<KnowledgeEntryResponse>, ApiError> {
	let response = state.service.add_knowledge_entry(payload).await?;

	Ok(Json(response))
}

async fn cache_answer(
	State(state): State<AppState>,
	Json(payload): Json<CacheAnswerRequest>,
) -> Result<Json<CacheAnswerResponse>, ApiError> {
	let response = state.service.cache_answer(payload).await?;

	Ok(Json(response))
}

async fn retrieve(
	State(state): State<AppState>,
	Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
	let response = state.service.retrieve(payload).await?;

	Ok(Json(response))
}

async fn record_interaction(
	State(state): State<AppState>,
	Json(payload): Json<InteractionRequest>,
) -> Result<Json<InteractionResponse>, ApiError> {
	let response = state.service.record_interaction(payload).await?;

	Ok(Json(response))
}

async fn submit_feedback(
	State(state): State<AppState>,
	Json(payload): Json<FeedbackRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
	let response = state.service.submit_feedback(payload).await?;

	Ok(Json(response))
}

async fn record_outcome(
	State(state): State<AppState>,
	Json(payload): Json<OutcomeRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
	let response = state.service.record_outcome(payload).await?;

	Ok(Json(response))
}

async fn learner_profile(
	State(state): State<AppState>,
	Json(payload): Json<ProfileRequest>,
) -> Result<Json<LearnerProfile>, ApiError> {
	let response = state.service.learner_profile(payload).await?;

	Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let status = match &err {
			Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			Error::NotFound { .. } => StatusCode::NOT_FOUND,
			Error::Conflict { .. } => StatusCode::CONFLICT,
			Error::Configuration { .. }
			| Error::Unavailable { .. }
			| Error::Provider { .. }
			| Error::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
		};
		let error_code = err.code();

		if status == StatusCode::SERVICE_UNAVAILABLE {
			tracing::error!(error_code, error = %err, "Request failed.");
		}

		let message = match err {
			Error::InvalidRequest { message }
			| Error::NotFound { message }
			| Error::Conflict { message }
			| Error::Configuration { message }
			| Error::Unavailable { message }
			| Error::Provider { message }
			| Error::Storage { message } => message,
		};

		Self::new(status, error_code, message)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
