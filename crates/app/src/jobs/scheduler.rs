use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Fixed-interval trigger. The first tick fires immediately; a cycle that
/// overruns pushes the next tick back instead of bursting.
pub struct IntervalSchedule {
    name: &'static str,
    ticker: Interval,
}

impl IntervalSchedule {
    pub fn new(name: &'static str, period: Duration) -> Self {
        let mut ticker = interval(period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { name, ticker }
    }

    /// Returns `false` once a stop has been requested.
    pub async fn tick(&mut self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(job = self.name, "stop requested; leaving schedule");
                false
            }
            _ = self.ticker.tick() => true,
        }
    }
}
