use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub min_interval: Duration,
    /// Upper bound of the doubling factor applied per consecutive failure.
    pub max_backoff_factor: u32,
    pub max_jitter: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_backoff_factor: 8,
            max_jitter: Duration::from_millis(500),
        }
    }
}

/// Spacing between outbound requests.
///
/// The interval is `min_interval * min(2^failures, max_backoff_factor)`; a
/// server retry hint sets a floor that the next request may not undercut.
/// State lives only in memory and resets on restart.
#[derive(Debug, Clone)]
pub struct Throttle {
    config: ThrottleConfig,
    last_request_at: Option<Instant>,
    consecutive_failures: u32,
    retry_not_before: Option<Instant>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_request_at: None,
            consecutive_failures: 0,
            retry_not_before: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn backoff_factor(&self) -> u32 {
        let cap = self.config.max_backoff_factor.max(1);
        if self.consecutive_failures >= u32::BITS - 1 {
            return cap;
        }
        (1u32 << self.consecutive_failures).min(cap)
    }

    /// Spacing for the current failure streak, without jitter.
    pub fn wait_interval(&self) -> Duration {
        self.config.min_interval * self.backoff_factor()
    }

    /// How long a request issued at `now` still has to wait, without jitter.
    pub fn remaining(&self, now: Instant) -> Duration {
        let spaced = self
            .last_request_at
            .map(|last| last + self.wait_interval());
        let ready_at = match (spaced, self.retry_not_before) {
            (Some(spaced), Some(floor)) => Some(spaced.max(floor)),
            (spaced, floor) => spaced.or(floor),
        };
        ready_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Wait before the next request, with jitter when any wait is needed.
    pub fn next_wait(&self, now: Instant) -> Duration {
        let remaining = self.remaining(now);
        if remaining.is_zero() {
            return remaining;
        }
        remaining + self.jitter()
    }

    pub fn jitter(&self) -> Duration {
        if self.config.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let fraction: f64 = rand::thread_rng().r#gen();
        self.config.max_jitter.mul_f64(fraction)
    }

    /// Records that a request went out; any pending retry hint is consumed.
    pub fn mark_request(&mut self, now: Instant) {
        self.last_request_at = Some(now);
        self.retry_not_before = None;
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn on_failure(&mut self, retry_after: Option<Duration>, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if let Some(hint) = retry_after {
            let floor = now + hint;
            self.retry_not_before = Some(match self.retry_not_before {
                Some(existing) => existing.max(floor),
                None => floor,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{Throttle, ThrottleConfig};

    fn throttle() -> Throttle {
        Throttle::new(ThrottleConfig {
            min_interval: Duration::from_secs(2),
            max_backoff_factor: 8,
            max_jitter: Duration::ZERO,
        })
    }

    #[test]
    fn first_request_goes_out_immediately() {
        assert_eq!(throttle().remaining(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn interval_is_non_decreasing_until_success() {
        let mut throttle = throttle();
        let now = Instant::now();
        let mut previous = throttle.wait_interval();
        assert_eq!(previous, Duration::from_secs(2));
        for _ in 0..40 {
            throttle.on_failure(None, now);
            let current = throttle.wait_interval();
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, Duration::from_secs(16));
        throttle.on_success();
        assert_eq!(throttle.wait_interval(), Duration::from_secs(2));
    }

    #[test]
    fn remaining_accounts_for_elapsed_time() {
        let mut throttle = throttle();
        let start = Instant::now();
        throttle.mark_request(start);
        assert_eq!(throttle.remaining(start), Duration::from_secs(2));
        assert_eq!(
            throttle.remaining(start + Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
        assert_eq!(throttle.remaining(start + Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn retry_hint_dominates_local_estimate() {
        let mut throttle = throttle();
        let start = Instant::now();
        throttle.mark_request(start);
        throttle.on_failure(Some(Duration::from_secs(10)), start);
        assert!(throttle.remaining(start) >= Duration::from_secs(10));
        assert!(throttle.next_wait(start) >= Duration::from_secs(10));
    }

    #[test]
    fn retry_hint_is_never_undercut_by_small_intervals() {
        let mut throttle = Throttle::new(ThrottleConfig {
            min_interval: Duration::ZERO,
            max_backoff_factor: 8,
            max_jitter: Duration::from_millis(300),
        });
        let start = Instant::now();
        throttle.on_failure(Some(Duration::from_secs(3)), start);
        for _ in 0..10 {
            assert!(throttle.next_wait(start) >= Duration::from_secs(3));
        }
    }

    #[test]
    fn hint_is_consumed_by_next_request() {
        let mut throttle = throttle();
        let start = Instant::now();
        throttle.on_failure(Some(Duration::from_secs(30)), start);
        let later = start + Duration::from_secs(30);
        throttle.mark_request(later);
        throttle.on_success();
        assert_eq!(throttle.remaining(later), Duration::from_secs(2));
    }
}
