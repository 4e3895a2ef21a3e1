pub mod atomic;
pub mod credential_store;
pub mod history;

use thiserror::Error;

pub use atomic::{read_json, write_json_atomic};
pub use credential_store::CredentialStore;
pub use history::HistoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid stored credential: {0}")]
    Credential(#[from] bilireply_core::error::CoreError),
}
