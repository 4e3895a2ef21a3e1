use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use bilireply_core::domain::video::VideoRecord;

use super::api::{ApiError, PlatformClient};
use crate::store::{read_json, write_json_atomic};

const FETCH_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum CacheFetchError {
    #[error("video list unavailable and nothing cached: {0}")]
    Unavailable(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCacheFile {
    pub videos: Vec<VideoRecord>,
    /// Unix seconds of the fetch that produced `videos`.
    pub fetch_time: i64,
    #[serde(default)]
    pub fetch_timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Fresh,
    Cached,
    /// Expired entry served because the refresh failed.
    Stale,
}

#[derive(Debug, Clone)]
pub struct VideoList {
    pub videos: Vec<VideoRecord>,
    pub source: ListSource,
    pub fetched_at: i64,
}

/// Long-lived, file-backed cache of the creator's video list.
pub struct ListCache {
    path: PathBuf,
    expire: Duration,
    uid: u64,
    entry: Option<ListCacheFile>,
}

impl ListCache {
    /// An unreadable cache file is logged and treated as absent.
    pub async fn open(path: impl Into<PathBuf>, expire: Duration, uid: u64) -> Self {
        let path = path.into();
        let entry = match read_json::<ListCacheFile>(&path).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "video cache unreadable; starting empty");
                None
            }
        };
        if let Some(entry) = entry.as_ref() {
            info!(
                videos = entry.videos.len(),
                fetched = %entry.fetch_timestamp,
                "video cache loaded"
            );
        }
        Self {
            path,
            expire,
            uid,
            entry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self) -> Option<&ListCacheFile> {
        self.entry.as_ref()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| age_secs(entry.fetch_time, now) < self.expire.as_secs())
    }

    pub async fn get(
        &mut self,
        client: &mut PlatformClient,
        now: DateTime<Utc>,
    ) -> Result<VideoList, CacheFetchError> {
        if let Some(entry) = self.entry.as_ref().filter(|_| self.is_fresh(now)) {
            let remaining = self
                .expire
                .as_secs()
                .saturating_sub(age_secs(entry.fetch_time, now));
            info!(
                videos = entry.videos.len(),
                remaining_hours = remaining as f64 / 3600.0,
                "using cached video list"
            );
            return Ok(VideoList {
                videos: entry.videos.clone(),
                source: ListSource::Cached,
                fetched_at: entry.fetch_time,
            });
        }

        match client.list_videos(self.uid).await {
            Ok(videos) => {
                let entry = ListCacheFile {
                    videos,
                    fetch_time: now.timestamp(),
                    fetch_timestamp: format_fetch_time(now.timestamp()),
                };
                if let Err(err) = write_json_atomic(&self.path, &entry).await {
                    warn!(error = %err, path = %self.path.display(), "video cache write failed");
                }
                info!(videos = entry.videos.len(), "video list refreshed");
                let list = VideoList {
                    videos: entry.videos.clone(),
                    source: ListSource::Fresh,
                    fetched_at: entry.fetch_time,
                };
                self.entry = Some(entry);
                Ok(list)
            }
            Err(err) => match self.entry.as_ref() {
                Some(entry) => {
                    warn!(
                        error = %err,
                        fetched = %entry.fetch_timestamp,
                        "video list refresh failed; serving expired cache"
                    );
                    Ok(VideoList {
                        videos: entry.videos.clone(),
                        source: ListSource::Stale,
                        fetched_at: entry.fetch_time,
                    })
                }
                None => Err(CacheFetchError::Unavailable(err)),
            },
        }
    }
}

fn age_secs(fetch_time: i64, now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp() - fetch_time).unwrap_or_default()
}

fn format_fetch_time(secs: i64) -> String {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|at| at.format(FETCH_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}
