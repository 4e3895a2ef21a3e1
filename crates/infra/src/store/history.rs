use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bilireply_core::domain::comments::HistoryRecord;
use tracing::info;

use super::{StoreError, read_json, write_json_atomic};

/// Append-only record of replied comments, doubling as the dedup set.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: Vec<HistoryRecord>,
    ids: HashSet<String>,
}

impl HistoryStore {
    /// Loads the whole history file. A corrupt file is an error rather than
    /// an empty history, since an empty history would re-reply to everything.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records: Vec<HistoryRecord> = read_json(&path).await?.unwrap_or_default();
        let ids = records
            .iter()
            .map(|record| record.comment_id.clone())
            .collect::<HashSet<_>>();
        info!(path = %path.display(), replied = ids.len(), "reply history loaded");
        Ok(Self { path, records, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, comment_id: &str) -> bool {
        self.ids.contains(comment_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Returns `Ok(false)` for an id that is already recorded.
    ///
    /// The record stays in memory even if the write fails, so the comment is
    /// not replied to again by this process and the next append rewrites it.
    pub async fn append(&mut self, record: HistoryRecord) -> Result<bool, StoreError> {
        if !self.ids.insert(record.comment_id.clone()) {
            return Ok(false);
        }
        self.records.push(record);
        write_json_atomic(&self.path, &self.records).await?;
        Ok(true)
    }
}
