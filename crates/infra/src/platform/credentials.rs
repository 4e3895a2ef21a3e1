use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use bilireply_core::domain::credential::CredentialBundle;
use bilireply_core::error::CoreError;

use super::api::{ApiError, PlatformClient};
use crate::store::{CredentialStore, StoreError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no refresh token configured")]
    MissingRefreshToken,
    #[error("platform call failed: {0}")]
    Api(#[from] ApiError),
    #[error("renewed credential is unusable: {0}")]
    Invalid(#[from] CoreError),
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Disabled,
    NotDue,
    /// The platform reported the current credential as still good.
    NotNeeded,
    Refreshed,
    Failed(String),
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Disabled => f.write_str("disabled"),
            RefreshOutcome::NotDue => f.write_str("not due"),
            RefreshOutcome::NotNeeded => f.write_str("not needed"),
            RefreshOutcome::Refreshed => f.write_str("refreshed"),
            RefreshOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Sole owner of the credential bundle; every mutation is persisted.
pub struct CredentialManager {
    bundle: CredentialBundle,
    store: CredentialStore,
    refresh_interval: ChronoDuration,
    enabled: bool,
    rejected: bool,
}

impl CredentialManager {
    pub fn new(
        bundle: CredentialBundle,
        store: CredentialStore,
        refresh_interval: std::time::Duration,
        enabled: bool,
    ) -> Self {
        Self {
            bundle,
            store,
            refresh_interval: ChronoDuration::from_std(refresh_interval)
                .unwrap_or_else(|_| ChronoDuration::minutes(30)),
            enabled,
            rejected: false,
        }
    }

    pub fn bundle(&self) -> &CredentialBundle {
        &self.bundle
    }

    pub fn csrf_token(&self) -> &str {
        self.bundle.csrf_token()
    }

    pub fn is_valid(&self) -> bool {
        !self.rejected && !self.bundle.csrf_token().is_empty()
    }

    pub fn can_refresh(&self) -> bool {
        self.enabled && self.bundle.refresh_token().is_some()
    }

    /// A rejected credential is always due.
    pub fn is_refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.rejected || now - self.bundle.last_refresh_check() >= self.refresh_interval
    }

    /// Called when an authenticated call was refused outright.
    pub fn mark_rejected(&mut self) {
        self.rejected = true;
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.bundle).await
    }

    pub async fn refresh_if_due(&mut self, client: &mut PlatformClient, now: DateTime<Utc>) -> RefreshOutcome {
        if !self.enabled {
            return RefreshOutcome::Disabled;
        }
        if !self.is_refresh_due(now) {
            return RefreshOutcome::NotDue;
        }
        match self.refresh(client, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "credential refresh failed; keeping current credential");
                self.bundle.mark_checked(now);
                if let Err(err) = self.persist().await {
                    warn!(error = %err, path = %self.store.path().display(), "credential persist failed");
                }
                RefreshOutcome::Failed(err.to_string())
            }
        }
    }

    /// Runs the challenge/exchange handshake. On any error before the swap
    /// the current bundle is left exactly as it was.
    pub async fn refresh(
        &mut self,
        client: &mut PlatformClient,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome, CredentialError> {
        let old_refresh_token = self
            .bundle
            .refresh_token()
            .ok_or(CredentialError::MissingRefreshToken)?
            .to_string();
        let old_csrf = self.bundle.csrf_token().to_string();

        let status = client.cookie_info(&old_csrf).await?;
        if !status.refresh && !self.rejected {
            self.bundle.mark_checked(now);
            self.persist().await?;
            info!("credential still valid; no refresh needed");
            return Ok(RefreshOutcome::NotNeeded);
        }

        let refresh_csrf = client.refresh_csrf(status.timestamp).await?;
        let exchange = client
            .exchange_cookie(&old_csrf, &refresh_csrf, &old_refresh_token)
            .await?;

        let mut jar = self.bundle.jar();
        let merged = jar.merge_set_cookie(exchange.set_cookies.iter().map(String::as_str));
        let mut renewed = self.bundle.clone();
        renewed.replace(&jar.to_string(), exchange.refresh_token, now)?;

        client.set_credential(renewed.raw_credential());
        if let Err(err) = client
            .confirm_refresh(renewed.csrf_token(), &old_refresh_token)
            .await
        {
            warn!(error = %err, "refresh confirmation failed; new credential kept");
        }

        self.bundle = renewed;
        self.rejected = false;
        if let Err(err) = self.persist().await {
            warn!(error = %err, path = %self.store.path().display(), "credential persist failed");
        }
        info!(cookies_updated = merged, "credential refreshed");
        Ok(RefreshOutcome::Refreshed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CredentialManager, RefreshOutcome};
    use crate::platform::api::{Endpoints, PlatformClient};
    use crate::platform::clock::ManualClock;
    use crate::platform::executor::tests::test_executor;
    use crate::store::CredentialStore;
    use bilireply_core::domain::credential::CredentialBundle;

    const RAW: &str = "SESSDATA=old; bili_jct=csrf-old; DedeUserID=42";

    fn manager(dir: &std::path::Path, issued: chrono::DateTime<Utc>) -> CredentialManager {
        let bundle = CredentialBundle::from_raw(RAW, Some("rt-old".to_string()), issued).unwrap();
        CredentialManager::new(
            bundle,
            CredentialStore::new(dir.join("credentials.json")),
            Duration::from_secs(1800),
            true,
        )
    }

    fn client(server: &MockServer) -> PlatformClient {
        PlatformClient::new(
            test_executor(Arc::new(ManualClock::new())),
            Endpoints::single(&server.uri()),
            RAW,
        )
    }

    async fn mount_challenge(server: &MockServer, needs_refresh: bool) {
        Mock::given(method("GET"))
            .and(path("/x/passport-web/cookie/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"refresh": needs_refresh, "timestamp": 1700000000000i64}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/correspond/1/[0-9a-f]{256}$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div id="1-name">rc-123</div>"#),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn refresh_replaces_credential_and_persists() {
        let server = MockServer::start().await;
        mount_challenge(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/x/passport-web/cookie/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "SESSDATA=new; Path=/; HttpOnly")
                    .append_header("set-cookie", "bili_jct=csrf-new; Path=/")
                    .set_body_json(json!({"code": 0, "data": {"refresh_token": "rt-new"}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-web/confirm/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now - ChronoDuration::hours(1));
        let mut client = client(&server);
        let outcome = manager.refresh_if_due(&mut client, now).await;
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(manager.csrf_token(), "csrf-new");
        assert_eq!(manager.bundle().refresh_token(), Some("rt-new"));
        assert!(client.credential().contains("SESSDATA=new"));
        assert!(client.credential().contains("DedeUserID=42"));

        let stored = CredentialStore::new(dir.path().join("credentials.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&stored, manager.bundle());
    }

    #[tokio::test]
    async fn failed_exchange_leaves_bundle_untouched() {
        let server = MockServer::start().await;
        mount_challenge(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/x/passport-web/cookie/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": 86095, "message": "refresh_csrf 错误"})),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now - ChronoDuration::hours(1));
        let before = manager.bundle().clone();
        let mut client = client(&server);
        let err = manager.refresh(&mut client, now).await.unwrap_err();
        assert!(err.to_string().contains("86095") || err.to_string().contains("refresh_csrf"));
        assert_eq!(manager.bundle(), &before);
        assert_eq!(client.credential(), RAW);
    }

    #[tokio::test]
    async fn refresh_if_due_degrades_on_failure() {
        let server = MockServer::start().await;
        mount_challenge(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/x/passport-web/cookie/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": -101})))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now - ChronoDuration::hours(1));
        let outcome = manager.refresh_if_due(&mut client(&server), now).await;
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        assert_eq!(manager.csrf_token(), "csrf-old");
        assert_eq!(manager.bundle().last_refresh_check(), now);
        assert!(!manager.is_refresh_due(now));
    }

    #[tokio::test]
    async fn not_due_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now - ChronoDuration::minutes(5));
        let outcome = manager.refresh_if_due(&mut client(&server), now).await;
        assert_eq!(outcome, RefreshOutcome::NotDue);
    }

    #[tokio::test]
    async fn healthy_credential_only_records_the_check() {
        let server = MockServer::start().await;
        mount_challenge(&server, false).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now - ChronoDuration::hours(2));
        let outcome = manager.refresh_if_due(&mut client(&server), now).await;
        assert_eq!(outcome, RefreshOutcome::NotNeeded);
        assert_eq!(manager.bundle().last_refresh_check(), now);
        assert_eq!(manager.csrf_token(), "csrf-old");
    }

    #[tokio::test]
    async fn rejection_forces_refresh_attempt() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let mut manager = manager(dir.path(), now);
        assert!(!manager.is_refresh_due(now));
        manager.mark_rejected();
        assert!(manager.is_refresh_due(now));
        assert!(!manager.is_valid());
    }

    #[tokio::test]
    async fn disabled_refresh_is_reported() {
        let dir = tempdir().unwrap();
        let bundle = CredentialBundle::from_raw(RAW, None, Utc::now()).unwrap();
        let mut manager = CredentialManager::new(
            bundle,
            CredentialStore::new(dir.path().join("c.json")),
            Duration::from_secs(1800),
            false,
        );
        let server = MockServer::start().await;
        let outcome = manager.refresh_if_due(&mut client(&server), Utc::now()).await;
        assert_eq!(outcome, RefreshOutcome::Disabled);
        assert!(!manager.can_refresh());
    }
}
