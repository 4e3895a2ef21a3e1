use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The session credential is no longer accepted.
    CredentialRejected,
    PermissionDenied,
    /// The platform refused this particular request.
    Rejected,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FatalKind::CredentialRejected => "credential rejected",
            FatalKind::PermissionDenied => "permission denied",
            FatalKind::Rejected => "request rejected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{endpoint}: {kind} (status {status}, code {code:?}): {message}")]
pub struct FatalHttpError {
    pub endpoint: String,
    pub kind: FatalKind,
    pub status: u16,
    pub code: Option<i64>,
    pub message: String,
}

/// Failures worth another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientReason {
    RateLimited { retry_after: Option<Duration> },
    Status(u16),
    PlatformBusy(i64),
    EmptyBody,
    MalformedEnvelope(String),
    Network(String),
}

impl TransientReason {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransientReason::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            TransientReason::RateLimited { .. } | TransientReason::PlatformBusy(_)
        )
    }
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientReason::RateLimited {
                retry_after: Some(after),
            } => write!(f, "rate limited, retry after {}s", after.as_secs()),
            TransientReason::RateLimited { retry_after: None } => f.write_str("rate limited"),
            TransientReason::Status(status) => write!(f, "http status {status}"),
            TransientReason::PlatformBusy(code) => write!(f, "platform busy (code {code})"),
            TransientReason::EmptyBody => f.write_str("empty body"),
            TransientReason::MalformedEnvelope(detail) => write!(f, "malformed envelope: {detail}"),
            TransientReason::Network(detail) => write!(f, "network error: {detail}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{endpoint}: gave up after {attempts} attempts, last failure: {last}")]
    ExhaustedRetries {
        endpoint: String,
        attempts: u32,
        last: TransientReason,
    },
    #[error(transparent)]
    Fatal(#[from] FatalHttpError),
    #[error("invalid request for {endpoint}: {reason}")]
    InvalidRequest { endpoint: String, reason: String },
}

impl RequestError {
    pub fn is_credential_rejected(&self) -> bool {
        matches!(
            self,
            RequestError::Fatal(FatalHttpError {
                kind: FatalKind::CredentialRejected,
                ..
            })
        )
    }

    pub fn platform_code(&self) -> Option<i64> {
        match self {
            RequestError::Fatal(err) => err.code,
            _ => None,
        }
    }
}
