pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(
	version = sage_cli::VERSION,
	rename_all = "kebab",
	styles = sage_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = sage_config::load(&args.config)?;

	init_tracing(&config);

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let sweep_interval = Duration::from_secs(config.jobs.sweep_interval_secs.max(1));
	let state = AppState::new(config).await?;
	let sweeper = state.spawn_job_sweeper(sweep_interval);
	let app = routes::router(state);
	let listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	let served = axum::serve(listener, app).await;

	sweeper.abort();

	served?;

	Ok(())
}

fn init_tracing(config: &sage_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
