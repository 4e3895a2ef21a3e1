use serde::{Deserialize, Serialize};

use crate::types::video_id::Bvid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: Bvid,
    /// Numeric archive id; resolved on demand when the listing omits it.
    #[serde(default)]
    pub aid: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub comment_count: u64,
}
