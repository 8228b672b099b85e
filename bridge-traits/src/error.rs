use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The platform reported that a stored key failed its integrity check
    /// (e.g. "Signature/MAC verification failed" from a hardware keystore).
    #[error("Key integrity check failed: {0}")]
    KeyIntegrity(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error means the key material itself is unusable and must be
    /// recreated, as opposed to a transient or environmental failure.
    pub fn is_key_integrity(&self) -> bool {
        matches!(self, BridgeError::KeyIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
