use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::JobError;
use crate::state::WorkerState;
use bilireply_core::domain::comments::Comment;
use bilireply_core::domain::video::VideoRecord;
use bilireply_infra::llm::PromptContext;
use bilireply_infra::platform::envelope::CODE_PARAM_ERROR;
use bilireply_infra::platform::{ApiError, ListSource, RefreshOutcome};

/// Smallest comment page size the adaptive rule will shrink to.
pub const MIN_COMMENT_PAGE_SIZE: u32 = 5;

#[derive(Debug, Default)]
pub struct CycleStats {
    pub refresh: Option<RefreshOutcome>,
    pub videos: usize,
    pub degraded_list: bool,
    pub video_failures: usize,
    pub comments_fetched: usize,
    pub skipped_history: usize,
    pub skipped_own: usize,
    pub pending: usize,
    pub replied: usize,
    pub dry_run_replies: usize,
    pub reply_failures: usize,
    pub generation_failures: usize,
    pub like_failures: usize,
    pub interrupted: bool,
}

#[derive(Debug)]
struct PendingReply {
    comment: Comment,
    aid: u64,
    video_title: String,
}

/// One pass of refresh check, video list, comment fetch, filter and reply.
pub async fn run(state: &mut WorkerState, shutdown: &CancellationToken) -> Result<CycleStats, JobError> {
    let mut stats = CycleStats::default();
    let now = Utc::now();

    let refresh = state.credentials.refresh_if_due(&mut state.client, now).await;
    match &refresh {
        RefreshOutcome::Refreshed => info!("credential refreshed before cycle"),
        RefreshOutcome::Failed(reason) => warn!(%reason, "credential refresh failed; continuing"),
        other => debug!(outcome = %other, "credential refresh check"),
    }
    stats.refresh = Some(refresh);

    if !state.config.reply_enabled {
        info!("auto reply disabled; skipping cycle");
        return Ok(stats);
    }

    let list = match state.videos.get(&mut state.client, now).await {
        Ok(list) => list,
        Err(err) => {
            warn!(error = %err, "video list unavailable; skipping cycle");
            return Ok(stats);
        }
    };
    stats.videos = list.videos.len();
    if list.source == ListSource::Stale {
        stats.degraded_list = true;
        warn!(fetched_at = list.fetched_at, "running on an expired video list");
    }

    let Some(pending) = collect_pending(state, &list.videos, &mut stats, shutdown).await? else {
        return Ok(stats);
    };
    stats.pending = pending.len();

    for item in pending {
        if shutdown.is_cancelled() {
            stats.interrupted = true;
            info!("stop requested; leaving remaining comments for the next run");
            break;
        }
        if !reply_to(state, item, &mut stats, shutdown).await? {
            break;
        }
    }

    let removed = state.client.executor_mut().purge_cache();
    log_request_health(state, removed);
    Ok(stats)
}

/// Fetches comments across videos until the per-cycle cap is reached.
/// `None` means a credential rejection ended the cycle early.
async fn collect_pending(
    state: &mut WorkerState,
    videos: &[VideoRecord],
    stats: &mut CycleStats,
    shutdown: &CancellationToken,
) -> Result<Option<Vec<PendingReply>>, JobError> {
    let max_process = state.config.reply_max_process;
    let own_uid = state.config.uid.to_string();
    let mut seen = HashSet::new();
    let mut pending = Vec::new();

    'videos: for video in videos {
        if pending.len() >= max_process || shutdown.is_cancelled() {
            break;
        }
        let aid = match video.aid {
            Some(aid) => aid,
            None => match state.client.resolve_aid(&video.id).await {
                Ok(aid) => aid,
                Err(err) => {
                    if err.is_credential_rejected() {
                        credential_rejected(state, &err)?;
                        return Ok(None);
                    }
                    stats.video_failures += 1;
                    warn!(video = %video.id, error = %err, "could not resolve archive id");
                    continue;
                }
            },
        };

        let mut page = 1;
        while page <= state.config.comment_max_pages {
            let page_size = state.comment_page_size;
            let batch = match state.client.list_comments(aid, page, page_size).await {
                Ok(batch) => batch,
                Err(err)
                    if err.platform_code() == Some(CODE_PARAM_ERROR)
                        && page_size > MIN_COMMENT_PAGE_SIZE =>
                {
                    let reduced = (page_size / 2).max(MIN_COMMENT_PAGE_SIZE);
                    warn!(video = %video.id, from = page_size, to = reduced, "comment page size rejected; shrinking");
                    state.comment_page_size = reduced;
                    continue;
                }
                Err(err) => {
                    if err.is_credential_rejected() {
                        credential_rejected(state, &err)?;
                        return Ok(None);
                    }
                    stats.video_failures += 1;
                    warn!(video = %video.id, page, error = %err, "comment fetch failed; skipping video");
                    continue 'videos;
                }
            };
            stats.comments_fetched += batch.comments.len();
            let has_more = batch.has_more();
            for comment in batch.comments {
                if state.history.contains(&comment.id) {
                    stats.skipped_history += 1;
                    continue;
                }
                if comment.author_id == own_uid {
                    stats.skipped_own += 1;
                    continue;
                }
                if !seen.insert(comment.id.clone()) {
                    continue;
                }
                pending.push(PendingReply {
                    comment,
                    aid,
                    video_title: video.title.clone(),
                });
                if pending.len() >= max_process {
                    break 'videos;
                }
            }
            if !has_more {
                break;
            }
            page += 1;
        }
    }

    debug!(pending = pending.len(), "comments selected for reply");
    Ok(Some(pending))
}

/// Returns `false` when the cycle must stop.
async fn reply_to(
    state: &mut WorkerState,
    item: PendingReply,
    stats: &mut CycleStats,
    shutdown: &CancellationToken,
) -> Result<bool, JobError> {
    let PendingReply {
        mut comment,
        aid,
        video_title,
    } = item;
    let csrf = state.credentials.csrf_token().to_string();

    if state.config.like_enabled && !state.dry_run {
        if let Err(err) = state.client.like_comment(aid, &comment.id, &csrf).await {
            stats.like_failures += 1;
            warn!(comment_id = %comment.id, error = %err, "like failed; replying anyway");
        }
    }

    let context = PromptContext {
        comment: comment.content.clone(),
        author: comment.author.clone(),
        video_title,
    };
    let generated = match state.generator.generate(&context).await {
        Ok(text) => text,
        Err(err) => {
            stats.generation_failures += 1;
            warn!(comment_id = %comment.id, error = %err, "reply generation failed; retrying next cycle");
            return Ok(true);
        }
    };
    let message = format!("{}{}", state.config.reply_prefix, generated);

    let delay = state.config.reply_delay;
    if !delay.is_zero() {
        let clock = state.client.executor().clock().clone();
        tokio::select! {
            _ = shutdown.cancelled() => {
                stats.interrupted = true;
                info!(comment_id = %comment.id, "stop requested before posting");
                return Ok(false);
            }
            _ = clock.sleep(delay) => {}
        }
    }

    if state.dry_run {
        stats.dry_run_replies += 1;
        info!(comment_id = %comment.id, author = %comment.author, reply = %message, "dry run; reply not posted");
        return Ok(true);
    }

    match state.client.post_reply(aid, &comment.id, &message, &csrf).await {
        Ok(()) => {
            stats.replied += 1;
            info!(comment_id = %comment.id, author = %comment.author, reply = %message, "reply posted");
            comment.mark_replied(message, Utc::now());
            if let Some(record) = comment.to_history() {
                if let Err(err) = state.history.append(record).await {
                    error!(comment_id = %comment.id, error = %err, "history write failed; reply kept in memory");
                }
            }
            Ok(true)
        }
        Err(err) if err.is_credential_rejected() => {
            stats.reply_failures += 1;
            credential_rejected(state, &err)?;
            Ok(false)
        }
        Err(err) => {
            stats.reply_failures += 1;
            warn!(comment_id = %comment.id, error = %err, "reply post failed; retrying next cycle");
            Ok(true)
        }
    }
}

/// A refusal is recoverable only while a refresh has not already been
/// tried against it.
fn credential_rejected(state: &mut WorkerState, err: &ApiError) -> Result<(), JobError> {
    let already_rejected = state.credentials.is_rejected();
    state.credentials.mark_rejected();
    if state.credentials.can_refresh() && !already_rejected {
        warn!(error = %err, "credential rejected; refresh will run before the next cycle");
        return Ok(());
    }
    Err(JobError::CredentialRejected(err.to_string()))
}

fn log_request_health(state: &WorkerState, cache_evicted: usize) {
    let executor = state.client.executor();
    let health = executor.monitor().stats(executor.clock().now());
    info!(
        window_secs = health.window_secs,
        rate = health.current_rate,
        failure_rate = health.failure_rate,
        avg_response_secs = health.avg_response_secs,
        total_requests = health.total_requests,
        total_429 = health.total_429,
        backoff_factor = executor.throttle().backoff_factor(),
        cache_evicted,
        "request health"
    );
    for recommendation in &health.recommendations {
        debug!(%recommendation, "request health recommendation");
    }
}
