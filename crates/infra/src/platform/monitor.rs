use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

const HIGH_RATE_PER_SEC: f64 = 0.5;
const HIGH_FAILURE_RATE: f64 = 0.1;
const SLOW_RESPONSE_SECS: f64 = 2.0;

/// Sliding-window view of request health, fed by the executor.
#[derive(Debug)]
pub struct RateLimitMonitor {
    window: Duration,
    requests: VecDeque<(Instant, Duration)>,
    failures: VecDeque<Instant>,
    status_codes: BTreeMap<u16, u64>,
    total_requests: u64,
    total_failures: u64,
    total_429: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub window_secs: u64,
    pub current_rate: f64,
    pub failure_rate: f64,
    pub avg_response_secs: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_429: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub recommendations: Vec<String>,
}

impl RateLimitMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            requests: VecDeque::new(),
            failures: VecDeque::new(),
            status_codes: BTreeMap::new(),
            total_requests: 0,
            total_failures: 0,
            total_429: 0,
        }
    }

    /// `status` is `None` when the request never got a response.
    pub fn record(&mut self, status: Option<u16>, latency: Duration, failed: bool, now: Instant) {
        self.requests.push_back((now, latency));
        self.total_requests += 1;
        if let Some(status) = status {
            *self.status_codes.entry(status).or_default() += 1;
        }
        let is_429 = status == Some(429);
        if failed || is_429 {
            self.failures.push_back(now);
            self.total_failures += 1;
        }
        if is_429 {
            self.total_429 += 1;
        }
        self.evict(now);
    }

    pub fn stats(&self, now: Instant) -> MonitorStats {
        let in_window = |at: &Instant| now.saturating_duration_since(*at) <= self.window;
        let latencies: Vec<Duration> = self
            .requests
            .iter()
            .filter(|(at, _)| in_window(at))
            .map(|(_, latency)| *latency)
            .collect();
        let failures = self.failures.iter().filter(|at| in_window(at)).count();
        let window_secs = self.window.as_secs_f64().max(1.0);

        let current_rate = latencies.len() as f64 / window_secs;
        let failure_rate = if latencies.is_empty() {
            0.0
        } else {
            failures as f64 / latencies.len() as f64
        };
        let avg_response_secs = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().map(Duration::as_secs_f64).sum::<f64>() / latencies.len() as f64
        };

        let mut stats = MonitorStats {
            window_secs: self.window.as_secs(),
            current_rate,
            failure_rate,
            avg_response_secs,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            total_429: self.total_429,
            status_codes: self.status_codes.clone(),
            recommendations: Vec::new(),
        };
        stats.recommendations = recommendations(&stats);
        stats
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.requests.front() {
            if now.saturating_duration_since(*at) <= self.window {
                break;
            }
            self.requests.pop_front();
        }
        while let Some(at) = self.failures.front() {
            if now.saturating_duration_since(*at) <= self.window {
                break;
            }
            self.failures.pop_front();
        }
    }
}

fn recommendations(stats: &MonitorStats) -> Vec<String> {
    let mut out = Vec::new();
    if stats.current_rate > HIGH_RATE_PER_SEC {
        out.push(format!(
            "request rate is high ({:.2}/s); raise the minimum request interval",
            stats.current_rate
        ));
    }
    if stats.failure_rate > HIGH_FAILURE_RATE {
        out.push(format!(
            "failure rate is high ({:.1}%); check request parameters or raise the retry delay",
            stats.failure_rate * 100.0
        ));
    }
    if stats.total_429 > 0 {
        out.push(format!(
            "{} rate-limit (429) responses seen; lower the request frequency substantially",
            stats.total_429
        ));
    }
    if stats.avg_response_secs > SLOW_RESPONSE_SECS {
        out.push(format!(
            "average response time is {:.2}s; the network may be degraded",
            stats.avg_response_secs
        ));
    }
    if stats.status_codes.get(&403).copied().unwrap_or(0) > 0 {
        out.push("403 responses seen; the cookie or user agent may need updating".to_string());
    }
    if out.is_empty() {
        out.push("request health is good; current settings look fine".to_string());
    }
    out
}
