//! Storage Abstractions
//!
//! Two primitives back the encrypted credential store:
//!
//! - [`KeyStore`] holds the master key material (Android Keystore, iOS
//!   Keychain, OS keyring on desktop).
//! - [`PreferenceStore`] holds named preference files of string entries
//!   (SharedPreferences, UserDefaults, a JSON file on desktop).
//!
//! Neither primitive encrypts anything itself. Encryption at rest is layered on
//! top by the core so that the corruption contract is identical on every host.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

/// Master key storage trait
///
/// # Corruption contract
///
/// When the platform reports that a stored key exists but cannot be used
/// (for example a keystore entry whose MAC no longer verifies after a backup
/// restore), implementations MUST return
/// [`BridgeError::KeyIntegrity`](crate::error::BridgeError::KeyIntegrity)
/// rather than a generic failure. The core treats that variant, and only that
/// variant, as recoverable by discarding the key.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyStore;
///
/// async fn has_master_key(store: &dyn KeyStore) -> Result<bool> {
///     Ok(store.load_key("auth_master_key").await?.is_some())
/// }
/// ```
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load key material for `alias`.
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if no key has been stored under this alias.
    async fn load_key(&self, alias: &str) -> Result<Option<Vec<u8>>>;

    /// Store key material, replacing any previous key under the same alias.
    async fn store_key(&self, alias: &str, key: &[u8]) -> Result<()>;

    /// Delete the key. Deleting a missing key is not an error.
    async fn delete_key(&self, alias: &str) -> Result<()>;
}

/// Named preference file storage trait
///
/// A preference file is a flat map of string entries. The core always reads
/// and writes a whole file, so implementations only need to provide atomic
/// whole-file replacement.
///
/// # Durability
///
/// [`commit`](PreferenceStore::commit) must not return until the new contents
/// are durable. A crash mid-commit must leave either the old or the new file,
/// never a mix of both.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Load every entry of `file`. A file that does not exist yields an empty map.
    async fn load(&self, file: &str) -> Result<HashMap<String, String>>;

    /// Atomically replace the contents of `file` with `entries`.
    async fn commit(&self, file: &str, entries: &HashMap<String, String>) -> Result<()>;

    /// Remove `file` entirely. Removing a missing file is not an error.
    async fn delete_file(&self, file: &str) -> Result<()>;
}
