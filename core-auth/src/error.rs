use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The encrypted credential store could not be opened, even after
    /// discarding a corrupted master key.
    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    /// The master key exists but failed an integrity check.
    #[error("Key integrity check failed: {0}")]
    KeyIntegrity(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A login attempt is already in progress")]
    LoginInProgress,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    #[error("{0}")]
    Other(String),
}

impl From<BridgeError> for AuthError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::KeyIntegrity(msg) => AuthError::KeyIntegrity(msg),
            other => AuthError::Bridge(other),
        }
    }
}

impl From<core_runtime::Error> for AuthError {
    fn from(e: core_runtime::Error) -> Self {
        match e {
            core_runtime::Error::Config(message) => AuthError::InvalidConfig(message),
            other => AuthError::Other(other.to_string()),
        }
    }
}

impl AuthError {
    /// Whether this error is the recoverable corruption signal.
    pub fn is_key_integrity(&self) -> bool {
        matches!(self, AuthError::KeyIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_error_maps_to_invalid_config() {
        let err: AuthError = core_runtime::Error::Config("Client id cannot be empty".to_string()).into();
        assert!(matches!(err, AuthError::InvalidConfig(msg) if msg == "Client id cannot be empty"));
    }

    #[test]
    fn test_missing_bridge_is_not_a_config_error() {
        let err: AuthError = core_runtime::Error::BridgeMissing {
            bridge: "KeyStore",
            message: "inject one".to_string(),
        }
        .into();
        assert!(matches!(err, AuthError::Other(msg) if msg.contains("KeyStore")));
    }
}
