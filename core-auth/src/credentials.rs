//! Credential persistence with master-key corruption recovery.

use bridge_traits::storage::{KeyStore, PreferenceStore};
use core_runtime::AuthConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::crypto::{Edit, EncryptedPreferences};
use crate::error::{AuthError, Result};
use crate::types::{AuthTokens, CredentialKey};

/// Encrypted key-value store for session credentials.
///
/// All reads and writes go through one async mutex, so recovery and
/// read-modify-write sequences never interleave. Writes are committed to the
/// preference store before the call returns.
pub struct CredentialStore {
    prefs: Mutex<EncryptedPreferences>,
    store: Arc<dyn PreferenceStore>,
    key_store: Arc<dyn KeyStore>,
    file: String,
    key_alias: String,
    recovered: bool,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("file", &self.file)
            .field("key_alias", &self.key_alias)
            .field("recovered", &self.recovered)
            .finish()
    }
}

impl CredentialStore {
    /// Open the store named by `config`.
    pub async fn open(config: &AuthConfig) -> Result<Self> {
        Self::open_with(
            &config.preference_file,
            &config.master_key_alias,
            config.preference_store.clone(),
            config.key_store.clone(),
        )
        .await
    }

    /// Open `file`, recovering once from a corrupted master key.
    ///
    /// Recovery discards every secret and keeps the selected region. A second
    /// failure, or any failure that is not a key integrity error, is returned
    /// as [`AuthError::SecureStorageUnavailable`].
    pub async fn open_with(
        file: &str,
        key_alias: &str,
        store: Arc<dyn PreferenceStore>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self> {
        let (prefs, recovered) =
            match EncryptedPreferences::open(file, store.clone(), key_store.as_ref(), key_alias)
                .await
            {
                Ok(prefs) => (prefs, false),
                Err(e) if e.is_key_integrity() => {
                    warn!(file = file, error = %e, "Master key failed integrity check, recovering");
                    let prefs = Self::recover(file, key_alias, &store, &key_store).await?;
                    (prefs, true)
                }
                Err(e) => {
                    error!(file = file, error = %e, "Failed to open credential store");
                    return Err(AuthError::SecureStorageUnavailable(e.to_string()));
                }
            };

        Ok(Self {
            prefs: Mutex::new(prefs),
            store,
            key_store,
            file: file.to_string(),
            key_alias: key_alias.to_string(),
            recovered,
        })
    }

    async fn recover(
        file: &str,
        key_alias: &str,
        store: &Arc<dyn PreferenceStore>,
        key_store: &Arc<dyn KeyStore>,
    ) -> Result<EncryptedPreferences> {
        let unavailable = |e: AuthError| AuthError::SecureStorageUnavailable(e.to_string());

        key_store
            .delete_key(key_alias)
            .await
            .map_err(|e| unavailable(e.into()))?;

        let region =
            match EncryptedPreferences::read_plain(store.as_ref(), file, CredentialKey::SelectedRegion)
                .await
            {
                Ok(region) => region,
                Err(e) => {
                    warn!(error = %e, "Selected region unreadable during recovery");
                    None
                }
            };

        store
            .delete_file(file)
            .await
            .map_err(|e| unavailable(e.into()))?;

        let mut prefs = EncryptedPreferences::open(file, store.clone(), key_store.as_ref(), key_alias)
            .await
            .map_err(|e| {
                error!(file = file, error = %e, "Credential store unusable after recovery");
                unavailable(e)
            })?;

        if let Some(region) = region.as_deref() {
            if let Err(e) = prefs
                .apply(&[Edit::Put(CredentialKey::SelectedRegion, region)])
                .await
            {
                warn!(error = %e, "Failed to restore selected region after recovery");
            }
        }

        info!(
            file = file,
            region_preserved = region.is_some(),
            "Credential store recovered with a fresh master key"
        );
        Ok(prefs)
    }

    /// Whether opening required corruption recovery.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub async fn get(&self, key: CredentialKey) -> Option<String> {
        let prefs = self.prefs.lock().await;
        match prefs.get(key) {
            Ok(value) => value,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to read credential");
                None
            }
        }
    }

    /// Both tokens, or `None` if either is missing.
    pub async fn tokens(&self) -> Option<AuthTokens> {
        let prefs = self.prefs.lock().await;
        let access = prefs.get(CredentialKey::AccessToken).ok().flatten()?;
        let refresh = prefs.get(CredentialKey::RefreshToken).ok().flatten()?;
        Some(AuthTokens::new(access, refresh))
    }

    /// Returns `true` iff the value was committed.
    pub async fn save(&self, key: CredentialKey, value: &str) -> bool {
        self.write(&[Edit::Put(key, value)]).await
    }

    /// Write access and refresh token in one commit.
    pub async fn save_session(&self, tokens: &AuthTokens) -> bool {
        self.write(&[
            Edit::Put(CredentialKey::AccessToken, &tokens.access_token),
            Edit::Put(CredentialKey::RefreshToken, &tokens.refresh_token),
        ])
        .await
    }

    pub async fn save_many(&self, values: &[(CredentialKey, &str)]) -> bool {
        self.update(values, &[]).await
    }

    pub async fn remove_many(&self, keys: &[CredentialKey]) -> bool {
        self.update(&[], keys).await
    }

    /// Write `puts` and delete `removes` in one commit.
    pub async fn update(&self, puts: &[(CredentialKey, &str)], removes: &[CredentialKey]) -> bool {
        let edits: Vec<Edit<'_>> = puts
            .iter()
            .map(|(k, v)| Edit::Put(*k, *v))
            .chain(removes.iter().map(|k| Edit::Remove(*k)))
            .collect();
        self.write(&edits).await
    }

    async fn write(&self, edits: &[Edit<'_>]) -> bool {
        let mut prefs = self.prefs.lock().await;
        match prefs.apply(edits).await {
            Ok(()) => true,
            Err(e) => {
                error!(file = %self.file, error = %e, "Failed to commit credentials");
                false
            }
        }
    }

    /// Remove the session secrets and the launch guard. The selected region is kept.
    pub async fn clear(&self) -> bool {
        let mut prefs = self.prefs.lock().await;
        match prefs.retain(&[CredentialKey::SelectedRegion]).await {
            Ok(()) => {
                debug!(file = %self.file, "Cleared credentials");
                true
            }
            Err(e) => {
                error!(file = %self.file, error = %e, "Failed to clear credentials");
                false
            }
        }
    }

    /// Wipe the whole file, selected region included.
    pub async fn clear_all(&self) -> bool {
        let mut prefs = self.prefs.lock().await;

        if let Err(e) = self.store.delete_file(&self.file).await {
            error!(file = %self.file, error = %e, "Failed to delete credential file");
            return false;
        }

        match EncryptedPreferences::open(
            &self.file,
            self.store.clone(),
            self.key_store.as_ref(),
            &self.key_alias,
        )
        .await
        {
            Ok(fresh) => {
                *prefs = fresh;
                info!(file = %self.file, "Wiped credential file");
                true
            }
            Err(e) => {
                error!(file = %self.file, error = %e, "Failed to reopen credential file");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::testing::{MemoryKeyStore, MemoryPreferenceStore};

    const FILE: &str = "auth_credentials";
    const ALIAS: &str = "auth_master_key";

    async fn open(prefs: &MemoryPreferenceStore, keys: &MemoryKeyStore) -> Result<CredentialStore> {
        CredentialStore::open_with(FILE, ALIAS, Arc::new(prefs.clone()), Arc::new(keys.clone()))
            .await
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let store = open(&MemoryPreferenceStore::new(), &MemoryKeyStore::new())
            .await
            .unwrap();

        assert!(store.save(CredentialKey::CodeVerifier, "verifier").await);
        assert_eq!(
            store.get(CredentialKey::CodeVerifier).await.as_deref(),
            Some("verifier")
        );
        assert!(!store.recovered());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_keeps_region() {
        let store = open(&MemoryPreferenceStore::new(), &MemoryKeyStore::new())
            .await
            .unwrap();
        store.save(CredentialKey::SelectedRegion, "eu").await;
        store.save(CredentialKey::CodeVerifier, "v").await;
        store.save_session(&AuthTokens::new("AT1", "RT1")).await;

        for _ in 0..2 {
            assert!(store.clear().await);
            assert_eq!(store.get(CredentialKey::SelectedRegion).await.as_deref(), Some("eu"));
            assert_eq!(store.get(CredentialKey::AccessToken).await, None);
            assert_eq!(store.get(CredentialKey::RefreshToken).await, None);
            assert_eq!(store.get(CredentialKey::CodeVerifier).await, None);
        }
    }

    #[tokio::test]
    async fn test_clear_removes_launch_guard() {
        let store = open(&MemoryPreferenceStore::new(), &MemoryKeyStore::new())
            .await
            .unwrap();
        store
            .save_many(&[
                (CredentialKey::DirectLoginLaunched, "true"),
                (CredentialKey::DirectLoginData, "payload"),
            ])
            .await;

        store.clear().await;

        for key in CredentialKey::LAUNCH_GUARD {
            assert_eq!(store.get(key).await, None);
        }
    }

    #[tokio::test]
    async fn test_save_session_is_atomic_on_failure() {
        let prefs = MemoryPreferenceStore::new();
        let store = open(&prefs, &MemoryKeyStore::new()).await.unwrap();

        prefs.set_fail_commits(true);
        assert!(!store.save_session(&AuthTokens::new("AT1", "RT1")).await);
        assert_eq!(store.get(CredentialKey::AccessToken).await, None);
        assert_eq!(store.get(CredentialKey::RefreshToken).await, None);

        prefs.set_fail_commits(false);
        assert!(store.save_session(&AuthTokens::new("AT1", "RT1")).await);
        let tokens = store.tokens().await.unwrap();
        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token, "RT1");
    }

    #[tokio::test]
    async fn test_recovery_preserves_region() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();
        {
            let store = open(&prefs, &keys).await.unwrap();
            store.save(CredentialKey::SelectedRegion, "us").await;
            store.save(CredentialKey::CodeVerifier, "v").await;
            store.save_session(&AuthTokens::new("AT1", "RT1")).await;
        }

        keys.fail_integrity(1);
        let store = open(&prefs, &keys).await.unwrap();

        assert!(store.recovered());
        assert_eq!(keys.delete_count(), 1);
        assert_eq!(store.get(CredentialKey::SelectedRegion).await.as_deref(), Some("us"));
        assert_eq!(store.get(CredentialKey::AccessToken).await, None);
        assert_eq!(store.get(CredentialKey::RefreshToken).await, None);
        assert_eq!(store.get(CredentialKey::CodeVerifier).await, None);
    }

    #[tokio::test]
    async fn test_recovery_from_scrambled_key() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();
        {
            let store = open(&prefs, &keys).await.unwrap();
            store.save_session(&AuthTokens::new("AT1", "RT1")).await;
        }

        keys.scramble(ALIAS);
        let store = open(&prefs, &keys).await.unwrap();

        assert!(store.recovered());
        assert!(store.tokens().await.is_none());
        assert!(store.save(CredentialKey::AccessToken, "AT2").await);
    }

    #[tokio::test]
    async fn test_second_integrity_failure_is_fatal() {
        let keys = MemoryKeyStore::new();
        keys.fail_integrity(2);

        let err = open(&MemoryPreferenceStore::new(), &keys).await.unwrap_err();
        assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_other_open_errors_are_not_recovered() {
        let prefs = MemoryPreferenceStore::new();
        prefs.set_fail_commits(true);
        let keys = MemoryKeyStore::new();

        let err = open(&prefs, &keys).await.unwrap_err();
        assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
        assert_eq!(keys.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_wipes_region() {
        let prefs = MemoryPreferenceStore::new();
        let store = open(&prefs, &MemoryKeyStore::new()).await.unwrap();
        store.save(CredentialKey::SelectedRegion, "eu").await;

        assert!(store.clear_all().await);
        assert_eq!(store.get(CredentialKey::SelectedRegion).await, None);
        assert!(store.save(CredentialKey::AccessToken, "AT").await);
    }
}
