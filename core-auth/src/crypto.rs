//! Encryption at rest for preference files.
//!
//! Secrets are sealed with AES-256-GCM under a master key held by the host
//! [`KeyStore`]. Each file carries a keyset sentinel sealed with the same key;
//! opening a file decrypts the sentinel first, so a replaced or damaged master
//! key is detected before any credential is read.
//!
//! # File layout
//!
//! | Entry name                    | Value                                   |
//! |-------------------------------|-----------------------------------------|
//! | `__keyset__`                  | `base64(nonce ‖ seal("keyset-v1"))`     |
//! | `s:<base64url(sha256(..))>`   | `base64(nonce ‖ seal(value))`           |
//! | `p:<key>`                     | plaintext value                         |
//!
//! Secret entry names are keyed hashes of the logical key, so the file does not
//! reveal which credentials it holds. The entry name is bound to the value as
//! associated data; swapping two ciphertexts breaks both tags. Plaintext entries
//! hold non-secret configuration that must stay readable when the master key
//! is lost.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bridge_traits::storage::{KeyStore, PreferenceStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::types::CredentialKey;

const KEYSET_ENTRY: &str = "__keyset__";
const KEYSET_PLAINTEXT: &[u8] = b"keyset-v1";
const SECRET_PREFIX: &str = "s:";
const PLAIN_PREFIX: &str = "p:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// AES-256 master key.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Generate a new random master key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self { bytes }
    }

    /// Key material of the wrong length is treated as corrupted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AuthError::KeyIntegrity(format!(
                "Master key has {} bytes, expected {}",
                bytes.len(),
                KEY_LEN
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// One entry change applied by [`EncryptedPreferences::apply`].
#[derive(Clone, Copy)]
pub enum Edit<'a> {
    Put(CredentialKey, &'a str),
    Remove(CredentialKey),
}

/// Encrypted view over one preference file.
///
/// Holds the decoded file in memory and commits whole-file replacements, so a
/// batch of edits lands atomically or not at all.
pub struct EncryptedPreferences {
    file: String,
    store: Arc<dyn PreferenceStore>,
    cipher: Aes256Gcm,
    name_salt: [u8; 32],
    entries: HashMap<String, String>,
}

impl fmt::Debug for EncryptedPreferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPreferences")
            .field("file", &self.file)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl EncryptedPreferences {
    /// Open `file`, creating the master key on first use.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyIntegrity`] if the key store reports a damaged key,
    ///   the key has the wrong length, the sentinel does not decrypt, or the file
    ///   holds secrets but the key is gone
    /// - [`AuthError::Bridge`] for any other storage failure
    pub async fn open(
        file: &str,
        store: Arc<dyn PreferenceStore>,
        key_store: &dyn KeyStore,
        key_alias: &str,
    ) -> Result<Self> {
        let entries = store.load(file).await?;
        let has_sealed_data = entries.contains_key(KEYSET_ENTRY)
            || entries.keys().any(|k| k.starts_with(SECRET_PREFIX));

        let key = match key_store.load_key(key_alias).await? {
            Some(bytes) => MasterKey::from_bytes(&bytes)?,
            None if has_sealed_data => {
                return Err(AuthError::KeyIntegrity(
                    "Master key missing for existing encrypted file".to_string(),
                ));
            }
            None => {
                info!(file = file, "Creating master key for credential file");
                let key = MasterKey::generate();
                key_store.store_key(key_alias, key.as_bytes()).await?;
                key
            }
        };

        let mut prefs = Self::with_key(file, store, &key, entries)?;

        match prefs.entries.get(KEYSET_ENTRY).cloned() {
            Some(sealed) => {
                let plain = prefs.unseal(KEYSET_ENTRY, &sealed)?;
                if plain != KEYSET_PLAINTEXT {
                    return Err(AuthError::KeyIntegrity(
                        "Keyset sentinel does not match".to_string(),
                    ));
                }
            }
            None if has_sealed_data => {
                return Err(AuthError::KeyIntegrity(
                    "Encrypted entries present without keyset sentinel".to_string(),
                ));
            }
            None => {
                let sealed = prefs.seal(KEYSET_ENTRY, KEYSET_PLAINTEXT)?;
                let mut next = prefs.entries.clone();
                next.insert(KEYSET_ENTRY.to_string(), sealed);
                prefs.commit(next).await?;
            }
        }

        debug!(file = file, entries = prefs.entries.len(), "Opened encrypted preferences");
        Ok(prefs)
    }

    fn with_key(
        file: &str,
        store: Arc<dyn PreferenceStore>,
        key: &MasterKey,
        entries: HashMap<String, String>,
    ) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| AuthError::KeyIntegrity(format!("Unusable master key: {}", e)))?;

        let mut hasher = Sha256::new();
        hasher.update(b"entry-name");
        hasher.update(key.as_bytes());
        let name_salt: [u8; 32] = hasher.finalize().into();

        Ok(Self {
            file: file.to_string(),
            store,
            cipher,
            name_salt,
            entries,
        })
    }

    /// Read a plaintext entry without the master key.
    ///
    /// Used to rescue non-secret configuration before a corrupted file is wiped.
    pub async fn read_plain(
        store: &dyn PreferenceStore,
        file: &str,
        key: CredentialKey,
    ) -> Result<Option<String>> {
        if key.is_secret() {
            return Err(AuthError::Other(format!(
                "{} is a secret and cannot be read without the master key",
                key
            )));
        }
        let entries = store.load(file).await?;
        Ok(entries.get(&plain_name(key)).cloned())
    }

    pub fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        if !key.is_secret() {
            return Ok(self.entries.get(&plain_name(key)).cloned());
        }

        let name = self.secret_name(key);
        let Some(sealed) = self.entries.get(&name) else {
            return Ok(None);
        };

        let plain = self.unseal(&name, sealed)?;
        String::from_utf8(plain)
            .map(Some)
            .map_err(|e| AuthError::KeyIntegrity(format!("Entry {} is not UTF-8: {}", key, e)))
    }

    pub fn contains(&self, key: CredentialKey) -> bool {
        let name = if key.is_secret() {
            self.secret_name(key)
        } else {
            plain_name(key)
        };
        self.entries.contains_key(&name)
    }

    /// Apply `edits` in a single durable commit.
    ///
    /// On error the in-memory view is unchanged.
    pub async fn apply(&mut self, edits: &[Edit<'_>]) -> Result<()> {
        let mut next = self.entries.clone();
        for edit in edits {
            match *edit {
                Edit::Put(key, value) if key.is_secret() => {
                    let name = self.secret_name(key);
                    let sealed = self.seal(&name, value.as_bytes())?;
                    next.insert(name, sealed);
                }
                Edit::Put(key, value) => {
                    next.insert(plain_name(key), value.to_string());
                }
                Edit::Remove(key) if key.is_secret() => {
                    next.remove(&self.secret_name(key));
                }
                Edit::Remove(key) => {
                    next.remove(&plain_name(key));
                }
            }
        }
        self.commit(next).await
    }

    /// Remove every entry except the keyset sentinel and `keep`.
    pub async fn retain(&mut self, keep: &[CredentialKey]) -> Result<()> {
        let kept: Vec<String> = keep
            .iter()
            .map(|k| {
                if k.is_secret() {
                    self.secret_name(*k)
                } else {
                    plain_name(*k)
                }
            })
            .collect();

        let next: HashMap<String, String> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() == KEYSET_ENTRY || kept.contains(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.commit(next).await
    }

    async fn commit(&mut self, next: HashMap<String, String>) -> Result<()> {
        self.store.commit(&self.file, &next).await?;
        self.entries = next;
        Ok(())
    }

    fn secret_name(&self, key: CredentialKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name_salt);
        hasher.update(key.as_str().as_bytes());
        format!("{}{}", SECRET_PREFIX, URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    fn seal(&self, name: &str, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|e| AuthError::Other(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn unseal(&self, name: &str, sealed: &str) -> Result<Vec<u8>> {
        let raw = STANDARD
            .decode(sealed.as_bytes())
            .map_err(|e| AuthError::KeyIntegrity(format!("Entry is not base64: {}", e)))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(AuthError::KeyIntegrity("Entry too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| {
                warn!(file = %self.file, "Authentication tag verification failed");
                AuthError::KeyIntegrity("Signature/MAC verification failed".to_string())
            })
    }
}

fn plain_name(key: CredentialKey) -> String {
    format!("{}{}", PLAIN_PREFIX, key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::testing::{MemoryKeyStore, MemoryPreferenceStore};

    const FILE: &str = "auth_credentials";
    const ALIAS: &str = "auth_master_key";

    async fn open(prefs: &MemoryPreferenceStore, keys: &MemoryKeyStore) -> Result<EncryptedPreferences> {
        EncryptedPreferences::open(FILE, Arc::new(prefs.clone()), keys, ALIAS).await
    }

    #[tokio::test]
    async fn test_first_open_creates_key_and_sentinel() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        open(&prefs, &keys).await.unwrap();

        assert_eq!(keys.key(ALIAS).map(|k| k.len()), Some(KEY_LEN));
        assert!(prefs.raw(FILE).contains_key(KEYSET_ENTRY));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        store
            .apply(&[
                Edit::Put(CredentialKey::AccessToken, "AT1"),
                Edit::Put(CredentialKey::SelectedRegion, "eu"),
            ])
            .await
            .unwrap();

        let reopened = open(&prefs, &keys).await.unwrap();
        assert_eq!(
            reopened.get(CredentialKey::AccessToken).unwrap().as_deref(),
            Some("AT1")
        );
        assert_eq!(
            reopened.get(CredentialKey::SelectedRegion).unwrap().as_deref(),
            Some("eu")
        );
    }

    #[tokio::test]
    async fn test_secrets_are_not_visible_on_disk() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        store
            .apply(&[Edit::Put(CredentialKey::RefreshToken, "RT-very-secret")])
            .await
            .unwrap();

        let raw = prefs.raw(FILE);
        for (name, value) in &raw {
            assert!(!name.contains("refreshToken"));
            assert!(!value.contains("RT-very-secret"));
        }
    }

    #[tokio::test]
    async fn test_region_is_readable_without_key() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        store
            .apply(&[Edit::Put(CredentialKey::SelectedRegion, "us")])
            .await
            .unwrap();

        let region = EncryptedPreferences::read_plain(&prefs, FILE, CredentialKey::SelectedRegion)
            .await
            .unwrap();
        assert_eq!(region.as_deref(), Some("us"));

        assert!(
            EncryptedPreferences::read_plain(&prefs, FILE, CredentialKey::AccessToken)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_scrambled_key_fails_integrity() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();
        open(&prefs, &keys).await.unwrap();

        keys.scramble(ALIAS);

        let err = open(&prefs, &keys).await.unwrap_err();
        assert!(err.is_key_integrity());
    }

    #[tokio::test]
    async fn test_lost_key_with_existing_data_fails_integrity() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();
        open(&prefs, &keys).await.unwrap();

        keys.delete_key(ALIAS).await.unwrap();

        let err = open(&prefs, &keys).await.unwrap_err();
        assert!(err.is_key_integrity());
    }

    #[tokio::test]
    async fn test_keystore_integrity_report_is_classified() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();
        keys.fail_integrity(1);

        let err = open(&prefs, &keys).await.unwrap_err();
        assert!(err.is_key_integrity());
    }

    #[tokio::test]
    async fn test_swapped_ciphertexts_are_rejected() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        store
            .apply(&[
                Edit::Put(CredentialKey::AccessToken, "AT1"),
                Edit::Put(CredentialKey::RefreshToken, "RT1"),
            ])
            .await
            .unwrap();

        let access = store.secret_name(CredentialKey::AccessToken);
        let refresh = store.secret_name(CredentialKey::RefreshToken);
        let mut raw = prefs.raw(FILE);
        let a = raw[&access].clone();
        let r = raw[&refresh].clone();
        raw.insert(access, r);
        raw.insert(refresh, a);
        prefs.put_raw(FILE, raw);

        let reopened = open(&prefs, &keys).await.unwrap();
        assert!(reopened
            .get(CredentialKey::AccessToken)
            .unwrap_err()
            .is_key_integrity());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_view_unchanged() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        prefs.set_fail_commits(true);

        assert!(store
            .apply(&[Edit::Put(CredentialKey::AccessToken, "AT1")])
            .await
            .is_err());
        assert_eq!(store.get(CredentialKey::AccessToken).unwrap(), None);
    }

    #[tokio::test]
    async fn test_retain_keeps_sentinel_and_listed_keys() {
        let prefs = MemoryPreferenceStore::new();
        let keys = MemoryKeyStore::new();

        let mut store = open(&prefs, &keys).await.unwrap();
        store
            .apply(&[
                Edit::Put(CredentialKey::AccessToken, "AT1"),
                Edit::Put(CredentialKey::CodeVerifier, "v"),
                Edit::Put(CredentialKey::SelectedRegion, "eu"),
            ])
            .await
            .unwrap();

        store.retain(&[CredentialKey::SelectedRegion]).await.unwrap();

        assert!(!store.contains(CredentialKey::AccessToken));
        assert!(!store.contains(CredentialKey::CodeVerifier));
        assert!(store.contains(CredentialKey::SelectedRegion));
        assert!(prefs.raw(FILE).contains_key(KEYSET_ENTRY));
        assert!(open(&prefs, &keys).await.is_ok());
    }

    #[test]
    fn test_master_key_length_is_checked() {
        assert!(MasterKey::from_bytes(&[0u8; 16]).unwrap_err().is_key_integrity());
        assert!(MasterKey::from_bytes(&[0u8; 32]).is_ok());
        assert!(format!("{:?}", MasterKey::generate()).contains("REDACTED"));
    }
}
