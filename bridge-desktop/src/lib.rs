//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `KeyStore` using the `keyring` crate (OS keychain)
//! - `PreferenceStore` using JSON files written through `tokio::fs`
//!
//! Desktop hosts have no embedded web view in this crate; they provide their own
//! `AuthSurface` (for example a system browser plus loopback redirect).
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FilePreferenceStore, KeyringKeyStore, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let preferences = FilePreferenceStore::in_data_dir().unwrap();
//!     let keys = KeyringKeyStore::new();
//!
//!     // Use in AuthConfig
//! }
//! ```

mod http;
mod preferences;

#[cfg(feature = "secure-store")]
mod keystore;

pub use http::ReqwestHttpClient;
pub use preferences::FilePreferenceStore;

#[cfg(feature = "secure-store")]
pub use keystore::KeyringKeyStore;
