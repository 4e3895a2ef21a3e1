pub mod scheduler;
pub mod tasks;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::WorkerState;
use bilireply_infra::store::{StoreError, write_json_atomic};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("credential rejected and no refresh path left: {0}")]
    CredentialRejected(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Runs poll cycles until stopped, then flushes what must survive a restart.
pub async fn start(
    state: &mut WorkerState,
    shutdown: &CancellationToken,
    once: bool,
) -> Result<(), JobError> {
    let mut schedule = scheduler::IntervalSchedule::new("poll_cycle", state.config.check_interval);
    let mut outcome = Ok(());
    while schedule.tick(shutdown).await {
        match tasks::poll_cycle::run(state, shutdown).await {
            Ok(stats) => info!(?stats, "poll cycle complete"),
            Err(err @ JobError::CredentialRejected(_)) => {
                error!(error = %err, "stopping worker");
                outcome = Err(err);
                break;
            }
            Err(err) => warn!(error = %err, "poll cycle failed"),
        }
        if once {
            break;
        }
        info!(
            interval_secs = state.config.check_interval.as_secs(),
            "waiting for next poll cycle"
        );
    }
    flush(state).await?;
    outcome
}

async fn flush(state: &WorkerState) -> Result<(), JobError> {
    state.credentials.persist().await?;
    info!("credential store flushed");
    if let Some(path) = state.config.monitor_report_file.as_deref() {
        let executor = state.client.executor();
        let stats = executor.monitor().stats(executor.clock().now());
        write_json_atomic(path, &stats).await?;
        info!(path = %path.display(), "request health report written");
    }
    Ok(())
}
