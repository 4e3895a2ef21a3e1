pub mod chat;

use async_trait::async_trait;
use thiserror::Error;

pub use chat::{ChatCompletionGenerator, ChatConfig, DEFAULT_PROMPT_TEMPLATE};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion was empty")]
    Empty,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What the reply generator gets to see about one comment.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub comment: String,
    pub author: String,
    pub video_title: String,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError>;
}
