use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;

use super::error::{FatalHttpError, FatalKind, TransientReason};

pub const CODE_OK: i64 = 0;
pub const CODE_NOT_LOGGED_IN: i64 = -101;
pub const CODE_CSRF_FAILED: i64 = -111;
pub const CODE_PARAM_ERROR: i64 = -400;
pub const CODE_FORBIDDEN: i64 = -403;
pub const CODE_INTERCEPTED: i64 = -412;
pub const CODE_TOO_FREQUENT: i64 = -509;
pub const CODE_RATE_LIMITED: i64 = -799;

/// Text the platform embeds in throttling responses.
pub const TOO_FREQUENT_MARKER: &str = "请求过于频繁";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug)]
pub enum Outcome {
    Success(Value),
    Transient(TransientReason),
    Fatal(FatalHttpError),
}

pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Classifies a JSON `{code, message, data}` response.
pub fn classify(endpoint: &str, status: u16, retry_after: Option<Duration>, body: &str) -> Outcome {
    if let Some(outcome) = classify_status(endpoint, status, retry_after, body) {
        return outcome;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Outcome::Transient(TransientReason::EmptyBody);
    }
    let envelope: Envelope = match serde_json::from_str(trimmed) {
        Ok(envelope) => envelope,
        Err(err) => {
            if trimmed.contains(TOO_FREQUENT_MARKER) {
                return Outcome::Transient(TransientReason::RateLimited { retry_after });
            }
            return Outcome::Transient(TransientReason::MalformedEnvelope(err.to_string()));
        }
    };
    match envelope.code {
        CODE_OK => Outcome::Success(envelope.data),
        CODE_INTERCEPTED | CODE_TOO_FREQUENT | CODE_RATE_LIMITED => {
            Outcome::Transient(TransientReason::PlatformBusy(envelope.code))
        }
        _ if envelope.message.contains(TOO_FREQUENT_MARKER) => {
            Outcome::Transient(TransientReason::RateLimited { retry_after })
        }
        code => {
            let kind = match code {
                CODE_NOT_LOGGED_IN | CODE_CSRF_FAILED => FatalKind::CredentialRejected,
                CODE_FORBIDDEN => FatalKind::PermissionDenied,
                _ => FatalKind::Rejected,
            };
            Outcome::Fatal(FatalHttpError {
                endpoint: endpoint.to_string(),
                kind,
                status,
                code: Some(code),
                message: envelope.message,
            })
        }
    }
}

/// Classifies a response whose payload is plain text (HTML pages).
pub fn classify_text(endpoint: &str, status: u16, retry_after: Option<Duration>, body: &str) -> Outcome {
    if let Some(outcome) = classify_status(endpoint, status, retry_after, body) {
        return outcome;
    }
    if body.trim().is_empty() {
        return Outcome::Transient(TransientReason::EmptyBody);
    }
    if body.contains(TOO_FREQUENT_MARKER) {
        return Outcome::Transient(TransientReason::RateLimited { retry_after });
    }
    Outcome::Success(Value::String(body.to_string()))
}

fn classify_status(
    endpoint: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> Option<Outcome> {
    let fatal = |kind| {
        Outcome::Fatal(FatalHttpError {
            endpoint: endpoint.to_string(),
            kind,
            status,
            code: None,
            message: truncate(body, 200),
        })
    };
    match status {
        200..=299 => None,
        429 => Some(Outcome::Transient(TransientReason::RateLimited { retry_after })),
        412 | 500..=599 => Some(Outcome::Transient(TransientReason::Status(status))),
        401 => Some(fatal(FatalKind::CredentialRejected)),
        403 => Some(fatal(FatalKind::PermissionDenied)),
        _ => Some(fatal(FatalKind::Rejected)),
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
