use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    /// Unix seconds as reported by the platform.
    pub posted_at: i64,
    pub processed: bool,
    pub reply_content: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn new(id: String, content: String, author: String, author_id: String, posted_at: i64) -> Self {
        Self {
            id,
            content,
            author,
            author_id,
            posted_at,
            processed: false,
            reply_content: None,
            replied_at: None,
        }
    }

    pub fn mark_replied(&mut self, reply: String, at: DateTime<Utc>) {
        self.processed = true;
        self.reply_content = Some(reply);
        self.replied_at = Some(at);
    }

    /// Only processed comments become history records.
    pub fn to_history(&self) -> Option<HistoryRecord> {
        if !self.processed {
            return None;
        }
        let reply_content = self.reply_content.clone()?;
        let replied_at = self.replied_at?;
        Some(HistoryRecord {
            comment_id: self.id.clone(),
            content: self.content.clone(),
            author: self.author.clone(),
            author_id: self.author_id.clone(),
            posted_at: self.posted_at,
            reply_time: replied_at.timestamp(),
            reply_content,
            timestamp: replied_at.format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub comment_id: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub posted_at: i64,
    pub reply_time: i64,
    pub reply_content: String,
    #[serde(default)]
    pub timestamp: String,
}
