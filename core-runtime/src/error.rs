//! Errors raised while assembling the runtime: configuration, bridges, logging.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Neither the host nor a platform default supplied this bridge.
    #[error("Bridge missing: {bridge} - {message}")]
    BridgeMissing {
        bridge: &'static str,
        message: String,
    },

    /// The platform default for a bridge could not be constructed.
    #[error("Default {bridge} unavailable: {message}")]
    DefaultBridge {
        bridge: &'static str,
        message: String,
    },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
