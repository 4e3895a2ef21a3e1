use std::path::{Path, PathBuf};

use bilireply_core::domain::credential::CredentialBundle;

use super::{StoreError, read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<CredentialBundle>, StoreError> {
        let Some(bundle) = read_json::<CredentialBundle>(&self.path).await? else {
            return Ok(None);
        };
        bundle.validate()?;
        Ok(Some(bundle))
    }

    pub async fn save(&self, bundle: &CredentialBundle) -> Result<(), StoreError> {
        write_json_atomic(&self.path, bundle).await
    }
}

#[cfg(test)]
mod tests {
    use bilireply_core::domain::credential::CredentialBundle;
    use chrono::Utc;

    use super::CredentialStore;

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let bundle = CredentialBundle::from_raw(
            "SESSDATA=s; bili_jct=c",
            Some("refresh".to_string()),
            Utc::now(),
        )
        .unwrap();

        store.save(&bundle).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, Some(bundle));
    }

    #[tokio::test]
    async fn load_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("missing.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_rejects_bundle_without_csrf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let raw = serde_json::json!({
            "rawCredential": "SESSDATA=s",
            "csrfToken": "",
            "issuedAt": "2024-01-01T00:00:00Z",
            "lastRefreshCheck": "2024-01-01T00:00:00Z"
        });
        tokio::fs::write(&path, raw.to_string()).await.unwrap();
        assert!(CredentialStore::new(path).load().await.is_err());
    }
}
