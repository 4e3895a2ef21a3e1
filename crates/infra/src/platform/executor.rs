use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderValue, SET_COOKIE};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::clock::{Clock, SystemClock};
use super::decode::decode_body;
use super::envelope::{self, Outcome};
use super::error::{RequestError, TransientReason};
use super::headers::{browser_headers, random_profile};
use super::monitor::RateLimitMonitor;
use super::response_cache::ResponseCache;
use super::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    Envelope,
    Text,
}

#[derive(Debug, Clone)]
pub struct PlatformRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
    cookie: Option<String>,
    cacheable: bool,
    payload: Payload,
}

impl PlatformRequest {
    /// Reads are cacheable unless [`PlatformRequest::no_cache`] is applied.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, true)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url, false)
    }

    fn new(method: Method, url: impl Into<String>, cacheable: bool) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            form: None,
            cookie: None,
            cacheable,
            payload: Payload::Envelope,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn form(mut self, name: &str, value: impl ToString) -> Self {
        self.form
            .get_or_insert_with(Vec::new)
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn cookie(mut self, raw: &str) -> Self {
        if !raw.trim().is_empty() {
            self.cookie = Some(raw.to_string());
        }
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// The response is a page rather than a JSON envelope.
    pub fn text(mut self) -> Self {
        self.payload = Payload::Text;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable && self.method == Method::GET
    }
}

#[derive(Debug, Clone)]
pub struct PlatformResponse {
    pub data: Value,
    pub set_cookies: Vec<String>,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_jitter: Duration,
    /// Upper bound applied to server `Retry-After` hints.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            max_jitter: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(300),
        }
    }
}

struct Attempt {
    status: Option<u16>,
    outcome: Outcome,
    set_cookies: Vec<String>,
}

/// Every call to the platform goes through here: pacing, caching, header
/// randomisation, body decoding, classification and bounded retries.
pub struct RequestExecutor {
    http: Client,
    throttle: Throttle,
    cache: ResponseCache,
    policy: RetryPolicy,
    monitor: RateLimitMonitor,
    clock: Arc<dyn Clock>,
}

impl RequestExecutor {
    pub fn new(
        http: Client,
        throttle: Throttle,
        cache: ResponseCache,
        policy: RetryPolicy,
        monitor: RateLimitMonitor,
    ) -> Self {
        Self {
            http,
            throttle,
            cache,
            policy,
            monitor,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn monitor(&self) -> &RateLimitMonitor {
        &self.monitor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn purge_cache(&mut self) -> usize {
        let now = self.clock.now();
        self.cache.purge_expired(now)
    }

    pub async fn execute(&mut self, request: &PlatformRequest) -> Result<PlatformResponse, RequestError> {
        let endpoint = request.url.as_str();
        let cookie = match request.cookie.as_deref().map(HeaderValue::from_str) {
            Some(Ok(value)) => Some(value),
            Some(Err(err)) => {
                return Err(RequestError::InvalidRequest {
                    endpoint: endpoint.to_string(),
                    reason: format!("cookie is not a valid header value: {err}"),
                });
            }
            None => None,
        };
        let cache_key = request
            .is_cacheable()
            .then(|| ResponseCache::key(request.method.as_str(), &request.url, &request.query));
        let attempts = self.policy.max_retries.max(1);
        let mut last_failure = TransientReason::EmptyBody;

        for attempt in 0..attempts {
            if let Some(key) = cache_key.as_deref() {
                if let Some(data) = self.cache.get(key, self.clock.now()) {
                    debug!(endpoint, "serving cached response");
                    return Ok(PlatformResponse {
                        data,
                        set_cookies: Vec::new(),
                        from_cache: true,
                    });
                }
            }

            let wait = self.throttle.next_wait(self.clock.now());
            if !wait.is_zero() {
                debug!(
                    endpoint,
                    wait_ms = wait.as_millis() as u64,
                    failures = self.throttle.consecutive_failures(),
                    "throttling request"
                );
                self.clock.sleep(wait).await;
            }

            let started = self.clock.now();
            self.throttle.mark_request(started);
            let result = self.send(request, cookie.as_ref()).await;
            let finished = self.clock.now();
            let latency = finished.saturating_duration_since(started);

            match result.outcome {
                Outcome::Success(data) => {
                    self.throttle.on_success();
                    self.monitor.record(result.status, latency, false, finished);
                    if let Some(key) = cache_key {
                        self.cache.insert(key, data.clone(), finished);
                    }
                    return Ok(PlatformResponse {
                        data,
                        set_cookies: result.set_cookies,
                        from_cache: false,
                    });
                }
                Outcome::Transient(reason) => {
                    self.monitor.record(result.status, latency, true, finished);
                    let hint = reason
                        .retry_after()
                        .map(|after| after.min(self.policy.max_retry_after));
                    self.throttle.on_failure(hint, finished);
                    warn!(
                        endpoint,
                        status = ?result.status,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        reason = %reason,
                        "transient platform failure"
                    );
                    last_failure = reason;
                    if attempt + 1 < attempts {
                        let backoff = self.policy.retry_delay * (attempt + 1) + self.retry_jitter();
                        self.clock.sleep(backoff).await;
                    }
                }
                Outcome::Fatal(err) => {
                    self.monitor.record(result.status, latency, true, finished);
                    self.throttle.on_failure(None, finished);
                    error!(
                        endpoint,
                        status = err.status,
                        code = ?err.code,
                        kind = %err.kind,
                        attempt = attempt + 1,
                        message = %err.message,
                        "platform rejected request"
                    );
                    return Err(RequestError::Fatal(err));
                }
            }
        }

        error!(endpoint, attempts, last = %last_failure, "retries exhausted");
        Err(RequestError::ExhaustedRetries {
            endpoint: endpoint.to_string(),
            attempts,
            last: last_failure,
        })
    }

    async fn send(&self, request: &PlatformRequest, cookie: Option<&HeaderValue>) -> Attempt {
        let profile = random_profile();
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(browser_headers(&profile));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(form) = request.form.as_ref() {
            builder = builder.form(form);
        }
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return network_failure(None, &err),
        };
        let status = response.status().as_u16();
        let retry_after = envelope::retry_after(response.headers());
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return network_failure(Some(status), &err),
        };
        let body = decode_body(&bytes);
        let outcome = match request.payload {
            Payload::Envelope => envelope::classify(&request.url, status, retry_after, &body),
            Payload::Text => envelope::classify_text(&request.url, status, retry_after, &body),
        };
        Attempt {
            status: Some(status),
            outcome,
            set_cookies,
        }
    }

    fn retry_jitter(&self) -> Duration {
        if self.policy.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let fraction: f64 = rand::Rng::r#gen(&mut rand::thread_rng());
        self.policy.max_jitter.mul_f64(fraction)
    }
}

fn network_failure(status: Option<u16>, err: &reqwest::Error) -> Attempt {
    Attempt {
        status,
        outcome: Outcome::Transient(TransientReason::Network(err.to_string())),
        set_cookies: Vec::new(),
    }
}
