mod cli;
mod config;
mod jobs;
mod state;
mod wiring;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::ConfigError;
use crate::jobs::JobError;
use crate::wiring::WiringError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("dotenv error: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("wiring error: {0}")]
    Wiring(#[from] WiringError),
    #[error("job error: {0}")]
    Jobs(#[from] JobError),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    config::load_dotenv()?;
    let config = config::AppConfig::from_env()?;
    info!(
        uid = config.uid,
        check_interval_secs = config.check_interval.as_secs(),
        refresh_enabled = config.refresh_enabled,
        like_enabled = config.like_enabled,
        dry_run = cli.dry_run,
        "configuration loaded"
    );
    let mut state = wiring::build_state(config, cli.dry_run).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received; finishing current comment");
        signal_token.cancel();
    });

    info!(once = cli.once, "reply worker starting");
    jobs::start(&mut state, &shutdown, cli.once).await?;
    info!("reply worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
