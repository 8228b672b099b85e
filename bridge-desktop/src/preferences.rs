//! Preference Files on Disk
//!
//! Each preference file is a flat JSON object stored as `<name>.json` under
//! the store's root directory. Commits write a sibling temp file, fsync it and
//! rename it over the original so readers never observe a torn file.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::PreferenceStore,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// JSON-file backed preference store
pub struct FilePreferenceStore {
    root: PathBuf,
}

impl FilePreferenceStore {
    /// Store preference files under `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store preference files in the platform data directory
    /// (e.g. `~/.local/share/embedded-auth-core` on Linux).
    pub fn in_data_dir() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            BridgeError::NotAvailable("No platform data directory available".to_string())
        })?;
        Ok(Self::new(base.join("embedded-auth-core")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file: &str) -> Result<PathBuf> {
        if file.is_empty() || file.contains(['/', '\\']) || file.starts_with('.') {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid preference file name: {}",
                file
            )));
        }
        Ok(self.root.join(format!("{}.json", file)))
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn load(&self, file: &str) -> Result<HashMap<String, String>> {
        let path = self.path_for(file)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                warn!(path = ?path, error = %e, "Preference file is not valid JSON");
                BridgeError::OperationFailed(format!("Corrupt preference file: {}", e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn commit(&self, file: &str, entries: &HashMap<String, String>) -> Result<()> {
        let path = self.path_for(file)?;
        let tmp = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.root).await?;

        let json = serde_json::to_vec(entries).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })?;

        let mut handle = tokio::fs::File::create(&tmp).await?;
        handle.write_all(&json).await?;
        handle.sync_all().await?;
        drop(handle);

        tokio::fs::rename(&tmp, &path).await?;

        debug!(file = file, entries = entries.len(), "Committed preference file");
        Ok(())
    }

    async fn delete_file(&self, file: &str) -> Result<()> {
        let path = self.path_for(file)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = file, "Deleted preference file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferenceStore::new(dir.path());

        assert!(store.load("auth_prefs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_replaces_whole_file() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("nested"));

        let mut first = HashMap::new();
        first.insert("a".to_string(), "1".to_string());
        first.insert("b".to_string(), "2".to_string());
        store.commit("auth_prefs", &first).await.unwrap();

        let mut second = HashMap::new();
        second.insert("b".to_string(), "3".to_string());
        store.commit("auth_prefs", &second).await.unwrap();

        let loaded = store.load("auth_prefs").await.unwrap();
        assert_eq!(loaded, second);
        assert!(!dir.path().join("nested/auth_prefs.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferenceStore::new(dir.path());

        let mut entries = HashMap::new();
        entries.insert("k".to_string(), "v".to_string());
        store.commit("auth_prefs", &entries).await.unwrap();

        store.delete_file("auth_prefs").await.unwrap();
        store.delete_file("auth_prefs").await.unwrap();
        assert!(store.load("auth_prefs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferenceStore::new(dir.path());

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferenceStore::new(dir.path());
        tokio::fs::write(dir.path().join("auth_prefs.json"), b"{not json")
            .await
            .unwrap();

        assert!(store.load("auth_prefs").await.is_err());
    }
}
