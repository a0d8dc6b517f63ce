use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use sage_chunking::RepairReport;
use sage_service::{Error, IngestJobs, IngestResponse, JobStatus};

fn response() -> IngestResponse {
	IngestResponse {
		document_id: "doc".to_string(),
		chunk_count: 0,
		chunk_ids: Vec::new(),
		repair_report: RepairReport::default(),
		embedding_model_id: "stub:model:8".to_string(),
	}
}

#[test]
fn job_runs_through_its_lifecycle() {
	let jobs = IngestJobs::new(Duration::minutes(10));
	let start = OffsetDateTime::UNIX_EPOCH;
	let job = jobs.create("s1", "doc", start);

	assert_eq!(job.status, JobStatus::Queued);

	jobs.mark_running(job.job_id, start + Duration::seconds(1)).expect("Transition failed.");
	jobs.succeed(job.job_id, response(), start + Duration::seconds(2)).expect("Transition failed.");

	let finished = jobs.get(job.job_id).expect("Job missing.");

	assert_eq!(finished.status, JobStatus::Succeeded);
	assert_eq!(finished.created_at, start);
	assert_eq!(finished.updated_at, start + Duration::seconds(2));
	assert_eq!(finished.result.map(|result| result.document_id), Some("doc".to_string()));
	assert!(finished.error.is_none());
}

#[test]
fn invalid_transitions_conflict_and_unknown_jobs_are_not_found() {
	let jobs = IngestJobs::new(Duration::minutes(10));
	let now = OffsetDateTime::UNIX_EPOCH;
	let job = jobs.create("s1", "doc", now);
	let early = jobs.succeed(job.job_id, response(), now).expect_err("Expected a conflict.");

	assert!(matches!(early, Error::Conflict { .. }));

	jobs.mark_running(job.job_id, now).expect("Transition failed.");
	jobs.succeed(job.job_id, response(), now).expect("Transition failed.");

	let again = jobs.mark_running(job.job_id, now).expect_err("Expected a conflict.");
	let unknown = jobs.mark_running(Uuid::new_v4(), now).expect_err("Expected not found.");

	assert!(matches!(again, Error::Conflict { .. }));
	assert!(matches!(unknown, Error::NotFound { .. }));
	assert_eq!(jobs.get(job.job_id).map(|job| job.status), Some(JobStatus::Succeeded));
}

#[test]
fn failure_records_the_error_code() {
	let jobs = IngestJobs::new(Duration::minutes(10));
	let now = OffsetDateTime::UNIX_EPOCH;
	let job = jobs.create("s1", "doc", now);
	let err = Error::Unavailable { message: "Embedding provider failed.".to_string() };

	jobs.fail(job.job_id, &err, now).expect("Queued jobs may fail.");

	let failed = jobs.get(job.job_id).expect("Job missing.");
	let failure = failed.error.expect("Failure missing.");

	assert_eq!(failed.status, JobStatus::Failed);
	assert_eq!(failure.error_code, "UNAVAILABLE");
	assert!(failure.message.contains("Embedding provider failed."));
}

#[test]
fn expiry_drops_only_finished_jobs_past_the_ttl() {
	let jobs = IngestJobs::new(Duration::minutes(10));
	let start = OffsetDateTime::UNIX_EPOCH;
	let old_done = jobs.create("s1", "old", start);
	let old_running = jobs.create("s1", "running", start);
	let recent_done = jobs.create("s1", "recent", start);

	jobs.mark_running(old_done.job_id, start).expect("Transition failed.");
	jobs.succeed(old_done.job_id, response(), start).expect("Transition failed.");
	jobs.mark_running(old_running.job_id, start).expect("Transition failed.");
	jobs.fail(
		recent_done.job_id,
		&Error::Storage { message: "Disk full.".to_string() },
		start + Duration::minutes(9),
	)
	.expect("Transition failed.");

	assert_eq!(jobs.expire(start + Duration::minutes(10)), 1);
	assert_eq!(jobs.len(), 2);
	assert!(jobs.get(old_done.job_id).is_none());
	assert!(jobs.get(old_running.job_id).is_some());
	assert!(jobs.get(recent_done.job_id).is_some());
	assert_eq!(jobs.expire(start + Duration::minutes(19)), 1);
	assert_eq!(jobs.len(), 1);
}

#[test]
fn ttl_beyond_the_calendar_keeps_finished_jobs() {
	let jobs = IngestJobs::new(Duration::seconds(i64::MAX));
	let start = OffsetDateTime::UNIX_EPOCH;
	let done = jobs.create("s1", "doc", start);

	jobs.mark_running(done.job_id, start).expect("Transition failed.");
	jobs.succeed(done.job_id, response(), start).expect("Transition failed.");

	assert_eq!(jobs.expire(start + Duration::days(365_000)), 0);
	assert!(jobs.get(done.job_id).is_some());
}
