use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid video id: {0}")]
    InvalidVideoId(String),
    #[error("credential has no csrf token (bili_jct)")]
    MissingCsrf,
    #[error("empty credential")]
    EmptyCredential,
}
