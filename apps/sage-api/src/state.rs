use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::task::JoinHandle;

use sage_service::{IngestJobs, SageService, Stores};
use sage_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<SageService>,
	pub jobs: Arc<IngestJobs>,
}
impl AppState {
	/// Uses Postgres when `storage.postgres` is configured and in-process stores otherwise.
	pub async fn new(config: sage_config::Config) -> color_eyre::Result<Self> {
		let stores = match &config.storage.postgres {
			Some(postgres) => {
				let db = Db::connect(postgres).await?;

				db.ensure_schema(config.storage.vector_dim).await?;

				Stores::postgres(Arc::new(db), config.ebars.clone())
			},
			None => {
				tracing::warn!("No Postgres configured. Using in-memory stores.");

				Stores::in_memory()
			},
		};
		let service = SageService::new(config, stores);

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: SageService) -> Self {
		let ttl_secs = service.cfg.jobs.ttl_secs.min(sage_config::MAX_JOB_TTL_SECS);
		let ttl = time::Duration::seconds(ttl_secs as i64);

		Self { service: Arc::new(service), jobs: Arc::new(IngestJobs::new(ttl)) }
	}

	/// Periodically drops finished ingestion jobs that outlived the TTL.
	pub fn spawn_job_sweeper(&self, interval: Duration) -> JoinHandle<()> {
		let jobs = self.jobs.clone();

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);

			loop {
				ticker.tick().await;

				let expired = jobs.expire(OffsetDateTime::now_utc());

				if expired > 0 {
					tracing::debug!(expired, remaining = jobs.len(), "Expired ingestion jobs.");
				}
			}
		})
	}
}
