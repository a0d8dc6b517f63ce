//! Ingestion job registry. Jobs move `queued -> running -> succeeded | failed` and finished jobs
//! are dropped once they are older than the configured TTL.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result, ingest::IngestResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Running,
	Succeeded,
	Failed,
}
impl JobStatus {
	pub fn is_finished(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed)
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct JobFailure {
	pub error_code: String,
	pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestJob {
	pub job_id: Uuid,
	pub session_id: String,
	pub document_id: String,
	pub status: JobStatus,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<IngestResponse>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JobFailure>,
}

pub struct IngestJobs {
	ttl: Duration,
	jobs: RwLock<AHashMap<Uuid, IngestJob>>,
}
impl IngestJobs {
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, jobs: RwLock::new(AHashMap::new()) }
	}

	pub fn create(&self, session_id: &str, document_id: &str, now: OffsetDateTime) -> IngestJob {
		let job = IngestJob {
			job_id: Uuid::new_v4(),
			session_id: session_id.to_string(),
			document_id: document_id.to_string(),
			status: JobStatus::Queued,
			created_at: now,
			updated_at: now,
			result: None,
			error: None,
		};

		write(&self.jobs).insert(job.job_id, job.clone());

		job
	}

	pub fn get(&self, job_id: Uuid) -> Option<IngestJob> {
		read(&self.jobs).get(&job_id).cloned()
	}

	pub fn mark_running(&self, job_id: Uuid, now: OffsetDateTime) -> Result<()> {
		self.transition(job_id, JobStatus::Running, now, |_| {})
	}

	pub fn succeed(&self, job_id: Uuid, response: IngestResponse, now: OffsetDateTime) -> Result<()> {
		self.transition(job_id, JobStatus::Succeeded, now, |job| job.result = Some(response))
	}

	pub fn fail(&self, job_id: Uuid, err: &Error, now: OffsetDateTime) -> Result<()> {
		let failure = JobFailure { error_code: err.code().to_string(), message: err.to_string() };

		self.transition(job_id, JobStatus::Failed, now, |job| job.error = Some(failure))
	}

	/// Drops finished jobs last updated at least one TTL before `now`. Returns how many were
	/// dropped. A TTL that reaches past the representable calendar never expires anything.
	pub fn expire(&self, now: OffsetDateTime) -> usize {
		let mut jobs = write(&self.jobs);
		let before = jobs.len();

		jobs.retain(|_, job| {
			let expired = job.updated_at.checked_add(self.ttl).is_some_and(|expiry| expiry <= now);

			!(job.status.is_finished() && expired)
		});

		before - jobs.len()
	}

	pub fn len(&self) -> usize {
		read(&self.jobs).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn transition(
		&self,
		job_id: Uuid,
		next: JobStatus,
		now: OffsetDateTime,
		update: impl FnOnce(&mut IngestJob),
	) -> Result<()> {
		let mut jobs = write(&self.jobs);
		let Some(job) = jobs.get_mut(&job_id) else {
			return Err(Error::NotFound { message: format!("Job {job_id} does not exist.") });
		};
		let allowed = matches!(
			(job.status, next),
			(JobStatus::Queued, JobStatus::Running)
				| (JobStatus::Queued | JobStatus::Running, JobStatus::Failed)
				| (JobStatus::Running, JobStatus::Succeeded)
		);

		if !allowed {
			return Err(Error::Conflict {
				message: format!("Job {job_id} cannot move from {:?} to {next:?}.", job.status),
			});
		}

		job.status = next;
		job.updated_at = now;

		update(job);

		Ok(())
	}
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
	lock.read().unwrap_or_else(|err| err.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
	lock.write().unwrap_or_else(|err| err.into_inner())
}
