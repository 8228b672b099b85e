//! Master Key Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyStore,
};
use keyring::Entry;
use tracing::{debug, error};

/// Keyring-based key storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Key material is base64 encoded because the keyring stores strings. A stored
/// value that no longer decodes is reported as `KeyIntegrity`.
pub struct KeyringKeyStore {
    service_name: String,
}

impl KeyringKeyStore {
    /// Create a new key store with default service name
    pub fn new() -> Self {
        Self {
            service_name: "embedded-auth-core".to_string(),
        }
    }

    /// Create a new key store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn get_entry(&self, alias: &str) -> Result<Entry> {
        Entry::new(&self.service_name, alias).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        match e {
            keyring::Error::BadEncoding(_) => BridgeError::KeyIntegrity(e.to_string()),
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                BridgeError::NotAvailable(format!("Keyring error: {}", e))
            }
            other => BridgeError::OperationFailed(format!("Keyring error: {}", other)),
        }
    }
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for KeyringKeyStore {
    async fn load_key(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        let entry = self.get_entry(alias)?;

        match entry.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    error!(alias = alias, error = %e, "Stored key is not valid base64");
                    BridgeError::KeyIntegrity(format!("Failed to decode key: {}", e))
                })?;
                debug!(alias = alias, "Loaded key from keyring");
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(alias = alias, "Key not found in keyring");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn store_key(&self, alias: &str, key: &[u8]) -> Result<()> {
        let entry = self.get_entry(alias)?;
        entry
            .set_password(&STANDARD.encode(key))
            .map_err(Self::map_keyring_error)?;

        debug!(alias = alias, "Stored key in keyring");
        Ok(())
    }

    async fn delete_key(&self, alias: &str) -> Result<()> {
        let entry = self.get_entry(alias)?;

        match entry.delete_credential() {
            Ok(_) => {
                debug!(alias = alias, "Deleted key from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_store_creation() {
        let store = KeyringKeyStore::new();
        assert_eq!(store.service_name, "embedded-auth-core");

        let store = KeyringKeyStore::with_service_name("test-service");
        assert_eq!(store.service_name, "test-service");
    }

    #[test]
    fn test_bad_encoding_maps_to_key_integrity() {
        let err = KeyringKeyStore::map_keyring_error(keyring::Error::BadEncoding(vec![0xff]));
        assert!(err.is_key_integrity());
    }

    #[tokio::test]
    async fn test_store_and_load_key() {
        // The OS keyring is often missing on headless CI machines.
        let store = KeyringKeyStore::with_service_name("test-embedded-auth-core");
        let alias = "test-master-key-unique-123";
        let key = [7u8; 32];

        let _ = store.delete_key(alias).await;

        match store.store_key(alias, &key).await {
            Ok(_) => {
                match store.load_key(alias).await {
                    Ok(Some(loaded)) => assert_eq!(loaded, key.to_vec()),
                    Ok(None) => println!("Warning: key was stored but not found"),
                    Err(e) => println!("Error loading key: {:?}", e),
                }
                let _ = store.delete_key(alias).await;
            }
            Err(e) => println!("Keyring not available ({}), skipping test", e),
        }
    }
}
