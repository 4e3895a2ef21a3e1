use std::sync::Arc;

use crate::config::AppConfig;
use bilireply_infra::llm::ReplyGenerator;
use bilireply_infra::platform::{CredentialManager, ListCache, PlatformClient};
use bilireply_infra::store::HistoryStore;

/// Everything the single poll worker owns. Only one cycle runs at a time,
/// so the worker holds it by `&mut` and nothing is shared or locked.
pub struct WorkerState {
    pub config: Arc<AppConfig>,
    pub client: PlatformClient,
    pub credentials: CredentialManager,
    pub videos: ListCache,
    pub history: HistoryStore,
    pub generator: Arc<dyn ReplyGenerator>,
    /// Current comment page size; shrinks when the platform rejects it.
    pub comment_page_size: u32,
    pub dry_run: bool,
}
