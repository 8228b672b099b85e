//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the auth core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per platform (Android, iOS, desktop).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP for the auth endpoints
//!
//! ### Security & Storage
//! - [`KeyStore`](storage::KeyStore) - Master key material (Keystore/Keychain/keyring)
//! - [`PreferenceStore`](storage::PreferenceStore) - Named preference files
//!
//! ### UI
//! - [`AuthSurface`](surface::AuthSurface) - Embedded web view that renders the hosted login
//!
//! ### Utilities
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Android  | host SDK            | ✅ Available |
//! | iOS      | host SDK            | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report unusable key material as `BridgeError::KeyIntegrity`
//! - Report expired deadlines as `BridgeError::Timeout`
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod storage;
pub mod surface;
pub mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{KeyStore, PreferenceStore};
pub use surface::{AuthSurface, DirectLoginAction, NavigationOutcome, RenderRequest};
pub use time::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
