use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;
use crate::state::WorkerState;
use bilireply_core::domain::credential::CredentialBundle;
use bilireply_core::error::CoreError;
use bilireply_infra::llm::{ChatCompletionGenerator, ChatConfig};
use bilireply_infra::platform::{
    Clock, CredentialManager, Endpoints, ListCache, PlatformClient, RateLimitMonitor,
    RequestExecutor, ResponseCache, RetryPolicy, SystemClock, Throttle, ThrottleConfig,
};
use bilireply_infra::store::{CredentialStore, HistoryStore, StoreError};

const THROTTLE_MAX_BACKOFF_FACTOR: u32 = 8;
const THROTTLE_MAX_JITTER: Duration = Duration::from_millis(500);
const RETRY_MAX_JITTER: Duration = Duration::from_secs(1);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);
const LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid credential: {0}")]
    Credential(#[from] CoreError),
    #[error("no stored credential and BILIREPLY_COOKIE is not set")]
    MissingCredential,
}

pub async fn build_state(config: AppConfig, dry_run: bool) -> Result<WorkerState, WiringError> {
    build_state_with(config, dry_run, Endpoints::default(), Arc::new(SystemClock)).await
}

pub async fn build_state_with(
    config: AppConfig,
    dry_run: bool,
    endpoints: Endpoints,
    clock: Arc<dyn Clock>,
) -> Result<WorkerState, WiringError> {
    let http = Client::builder().timeout(config.request_timeout).build()?;

    let store = CredentialStore::new(&config.credential_file);
    let bundle = match store.load().await? {
        Some(mut bundle) => {
            info!(path = %store.path().display(), "credential loaded from store");
            if let Some(token) = config.refresh_token.as_deref() {
                if bundle.adopt_refresh_token(token) {
                    info!("stored credential had no refresh token; using BILIREPLY_REFRESH_TOKEN");
                }
            }
            bundle
        }
        None => {
            let raw = config
                .cookie
                .as_deref()
                .ok_or(WiringError::MissingCredential)?;
            CredentialBundle::from_raw(raw, config.refresh_token.clone(), Utc::now())?
        }
    };
    store.save(&bundle).await?;

    let executor = RequestExecutor::new(
        http.clone(),
        Throttle::new(ThrottleConfig {
            min_interval: config.min_request_interval,
            max_backoff_factor: THROTTLE_MAX_BACKOFF_FACTOR,
            max_jitter: THROTTLE_MAX_JITTER,
        }),
        ResponseCache::new(config.response_cache_ttl),
        RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            max_jitter: RETRY_MAX_JITTER,
            max_retry_after: MAX_RETRY_AFTER,
        },
        RateLimitMonitor::new(config.monitor_window),
    )
    .with_clock(clock);
    let client = PlatformClient::new(executor, endpoints, bundle.raw_credential());
    let credentials = CredentialManager::new(
        bundle,
        store,
        config.refresh_interval,
        config.refresh_enabled,
    );

    let videos = ListCache::open(&config.video_cache_file, config.video_cache_expire, config.uid).await;
    let history = HistoryStore::open(&config.history_file).await?;
    info!(records = history.len(), "reply history loaded");

    let generator = ChatCompletionGenerator::new(
        http,
        ChatConfig {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            prompt_template: config.prompt_template.clone(),
            timeout: LLM_TIMEOUT,
        },
    );

    Ok(WorkerState {
        comment_page_size: config.comment_page_size,
        config: Arc::new(config),
        client,
        credentials,
        videos,
        history,
        generator: Arc::new(generator),
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::{WiringError, build_state_with};
    use crate::config::AppConfig;
    use bilireply_infra::platform::{Endpoints, ManualClock};
    use bilireply_infra::store::CredentialStore;

    fn config(dir: &std::path::Path, cookie: Option<&str>) -> AppConfig {
        config_with_token(dir, cookie, None)
    }

    fn config_with_token(
        dir: &std::path::Path,
        cookie: Option<&str>,
        refresh_token: Option<&str>,
    ) -> AppConfig {
        let dir = dir.to_path_buf();
        let cookie = cookie.map(str::to_string);
        let refresh_token = refresh_token.map(str::to_string);
        AppConfig::from_lookup(move |key| match key {
            "BILIREPLY_COOKIE" => cookie.clone(),
            "BILIREPLY_REFRESH_TOKEN" => refresh_token.clone(),
            "BILIREPLY_UID" => Some("42".to_string()),
            "BILIREPLY_LLM_API_KEY" => Some("k".to_string()),
            "BILIREPLY_CREDENTIAL_FILE" => Some(dir.join("cred.json").display().to_string()),
            "BILIREPLY_HISTORY_FILE" => Some(dir.join("history.json").display().to_string()),
            "BILIREPLY_VIDEO_CACHE_FILE" => Some(dir.join("videos.json").display().to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn config_cookie_seeds_and_persists_store() {
        let dir = tempdir().unwrap();
        let state = build_state_with(
            config(dir.path(), Some("SESSDATA=a; bili_jct=first")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        assert_eq!(state.credentials.csrf_token(), "first");
        let stored = CredentialStore::new(dir.path().join("cred.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.csrf_token(), "first");
    }

    #[tokio::test]
    async fn stored_credential_wins_over_config() {
        let dir = tempdir().unwrap();
        build_state_with(
            config(dir.path(), Some("SESSDATA=a; bili_jct=stored")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();

        let state = build_state_with(
            config(dir.path(), Some("SESSDATA=b; bili_jct=config")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        assert_eq!(state.credentials.csrf_token(), "stored");
        assert!(state.client.credential().contains("bili_jct=stored"));
    }

    #[tokio::test]
    async fn refresh_token_added_later_is_adopted_by_stored_credential() {
        let dir = tempdir().unwrap();
        let first = build_state_with(
            config(dir.path(), Some("SESSDATA=a; bili_jct=stored")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        assert!(!first.credentials.can_refresh());

        let state = build_state_with(
            config_with_token(dir.path(), Some("SESSDATA=a; bili_jct=stored"), Some("rt-added")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        assert_eq!(state.credentials.bundle().refresh_token(), Some("rt-added"));
        assert!(state.credentials.can_refresh());
        let stored = CredentialStore::new(dir.path().join("cred.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.refresh_token(), Some("rt-added"));
        assert_eq!(stored.csrf_token(), "stored");
    }

    #[tokio::test]
    async fn stored_refresh_token_is_not_overwritten_by_config() {
        let dir = tempdir().unwrap();
        build_state_with(
            config_with_token(dir.path(), Some("SESSDATA=a; bili_jct=stored"), Some("rt-rotated")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();

        let state = build_state_with(
            config_with_token(dir.path(), Some("SESSDATA=a; bili_jct=stored"), Some("rt-stale")),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        assert_eq!(state.credentials.bundle().refresh_token(), Some("rt-rotated"));
    }

    #[tokio::test]
    async fn no_credential_anywhere_fails() {
        let dir = tempdir().unwrap();
        let result = build_state_with(
            config(dir.path(), None),
            false,
            Endpoints::single("http://127.0.0.1:9"),
            Arc::new(ManualClock::new()),
        )
        .await;
        assert!(matches!(result, Err(WiringError::MissingCredential)));
    }
}
