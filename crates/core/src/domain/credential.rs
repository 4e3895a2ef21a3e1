use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::cookie::CookieJar;

/// Session credential set needed to act as the creator on the platform.
///
/// `csrf_token` is always the `bili_jct` value of `raw_credential`; both are
/// only ever replaced together through [`CredentialBundle::replace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    raw_credential: String,
    #[serde(default)]
    refresh_token: Option<String>,
    csrf_token: String,
    issued_at: DateTime<Utc>,
    last_refresh_check: DateTime<Utc>,
}

impl CredentialBundle {
    pub fn from_raw(
        raw: &str,
        refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let (raw_credential, csrf_token) = normalize(raw)?;
        Ok(Self {
            raw_credential,
            refresh_token: refresh_token.filter(|token| !token.trim().is_empty()),
            csrf_token,
            issued_at: now,
            last_refresh_check: now,
        })
    }

    /// Re-checks the invariant after deserialization.
    pub fn validate(&self) -> Result<(), CoreError> {
        let (_, csrf) = normalize(&self.raw_credential)?;
        if csrf != self.csrf_token {
            return Err(CoreError::MissingCsrf);
        }
        Ok(())
    }

    /// Swaps in a renewed credential. The bundle is untouched on error.
    pub fn replace(
        &mut self,
        raw: &str,
        refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let (raw_credential, csrf_token) = normalize(raw)?;
        self.raw_credential = raw_credential;
        self.csrf_token = csrf_token;
        if let Some(token) = refresh_token.filter(|token| !token.trim().is_empty()) {
            self.refresh_token = Some(token);
        }
        self.issued_at = now;
        self.last_refresh_check = now;
        Ok(())
    }

    /// Sets the refresh token if the bundle has none. Returns whether it changed.
    pub fn adopt_refresh_token(&mut self, token: &str) -> bool {
        let token = token.trim();
        if self.refresh_token.is_some() || token.is_empty() {
            return false;
        }
        self.refresh_token = Some(token.to_string());
        true
    }

    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_refresh_check = now;
    }

    pub fn raw_credential(&self) -> &str {
        &self.raw_credential
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn jar(&self) -> CookieJar {
        CookieJar::parse(&self.raw_credential)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn last_refresh_check(&self) -> DateTime<Utc> {
        self.last_refresh_check
    }
}

fn normalize(raw: &str) -> Result<(String, String), CoreError> {
    let jar = CookieJar::parse(raw);
    if jar.is_empty() {
        return Err(CoreError::EmptyCredential);
    }
    let csrf = jar.csrf_token().ok_or(CoreError::MissingCsrf)?.to_string();
    Ok((jar.to_string(), csrf))
}
