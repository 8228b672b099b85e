//! # Auth Configuration Module
//!
//! Provides configuration management for the embedded auth core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an `AuthConfig`
//! instance that holds the identity-provider settings and the host bridges the
//! core needs. It enforces fail-fast validation so that a misconfigured host
//! learns about it at startup rather than on the first login.
//!
//! ## Required Settings
//!
//! - `base_url` and `client_id`, either directly or through at least one region
//!
//! ## Bridges (with platform defaults)
//!
//! - `HttpClient` - token endpoint calls (desktop default: reqwest)
//! - `PreferenceStore` - encrypted credential file (desktop default: JSON files)
//! - `KeyStore` - master key (desktop default: OS keyring)
//!
//! When the `desktop-shims` feature is enabled, the desktop adapters are
//! injected automatically for any bridge not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AuthConfig, RegionConfig};
//! use std::sync::Arc;
//!
//! let config = AuthConfig::builder()
//!     .base_url("https://auth.example.com")
//!     .client_id("b6adfe4c-d695-4c04-b95f-3ec9fd0c6cca")
//!     .application_id("com.example.app")
//!     .http_client(Arc::new(MyHttpClient))
//!     .preference_store(Arc::new(MyPreferences))
//!     .key_store(Arc::new(MyKeyStore))
//!     .build()?;
//!
//! assert_eq!(
//!     config.redirect_url(),
//!     "com.example.app://auth.example.com/android/oauth/callback"
//! );
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::AuthConfig;
//!
//! // Missing base URL and client id
//! let config = AuthConfig::builder()
//!     .build()
//!     .expect("Should fail - no identity provider configured");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, KeyStore, PreferenceStore};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default preference file holding the encrypted credential record.
pub const DEFAULT_PREFERENCE_FILE: &str = "auth_credentials";

/// Default key alias for the credential master key.
pub const DEFAULT_MASTER_KEY_ALIAS: &str = "auth_master_key";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Relative paths of the identity provider endpoints, joined onto the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub exchange_token: String,
    pub refresh_token: String,
    pub me: String,
    pub logout: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            exchange_token: "oauth/token".to_string(),
            refresh_token: "oauth/token".to_string(),
            me: "identity/resources/users/v2/me".to_string(),
            logout: "identity/resources/auth/v1/logout".to_string(),
        }
    }
}

/// One deployment of the identity provider. Hosts that serve several markets
/// (EU, US, ...) configure one region per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub key: String,
    pub base_url: String,
    pub client_id: String,
}

impl RegionConfig {
    pub fn new(
        key: impl Into<String>,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            base_url: base_url.into(),
            client_id: client_id.into(),
        }
    }
}

/// Configuration for the embedded auth core.
///
/// Use [`AuthConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct AuthConfig {
    /// Identity provider base URL, without trailing slash
    pub base_url: String,

    /// OAuth client id
    pub client_id: String,

    /// Host application id, used as the callback URL scheme
    pub application_id: Option<String>,

    /// Explicit callback URL overriding the derived one
    pub redirect_uri: Option<String>,

    /// Endpoint paths relative to `base_url`
    pub endpoints: EndpointPaths,

    /// Known regions; empty for single-region hosts
    pub regions: Vec<RegionConfig>,

    /// Key of the region `base_url`/`client_id` were taken from
    pub active_region: Option<String>,

    /// Per-request timeout applied to every token service call
    pub request_timeout: Duration,

    /// Preference file name for the credential record
    pub preference_file: String,

    /// Key store alias for the master key
    pub master_key_alias: String,

    /// HTTP client for the token endpoints
    pub http_client: Arc<dyn HttpClient>,

    /// Raw preference storage beneath the encryption layer
    pub preference_store: Arc<dyn PreferenceStore>,

    /// Master key storage
    pub key_store: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("application_id", &self.application_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("endpoints", &self.endpoints)
            .field("regions", &self.regions)
            .field("active_region", &self.active_region)
            .field("request_timeout", &self.request_timeout)
            .field("preference_file", &self.preference_file)
            .field("http_client", &"HttpClient { ... }")
            .field("preference_store", &"PreferenceStore { ... }")
            .field("key_store", &"KeyStore { ... }")
            .finish()
    }
}

impl AuthConfig {
    /// Creates a new builder for constructing an `AuthConfig`.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// The fixed callback URL the hosted login page redirects to.
    ///
    /// `{application_id}://{host}/android/oauth/callback` when an application id
    /// is configured, otherwise `{base_url}/oauth/callback`.
    pub fn redirect_url(&self) -> String {
        if let Some(explicit) = &self.redirect_uri {
            return explicit.clone();
        }

        match &self.application_id {
            Some(app_id) => {
                let host = Url::parse(&self.base_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();
                format!("{}://{}/android/oauth/callback", app_id, host)
            }
            None => format!("{}/oauth/callback", self.base_url),
        }
    }

    /// Absolute URL of an endpoint path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn region(&self, key: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.key == key)
    }

    /// A copy of this configuration pointed at region `key`.
    ///
    /// Returns `None` for unknown regions.
    pub fn with_active_region(&self, key: &str) -> Option<AuthConfig> {
        let region = self.region(key)?;
        let mut config = self.clone();
        config.base_url = normalize_base_url(&region.base_url);
        config.client_id = region.client_id.clone();
        config.active_region = Some(region.key.clone());
        Some(config)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Base URL is an absolute http(s) URL
    /// - Client id is not empty
    /// - Region keys are unique and every region is itself valid
    /// - Request timeout is non-zero
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;

        if self.client_id.trim().is_empty() {
            return Err(Error::Config("Client id cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.preference_file.is_empty() || self.master_key_alias.is_empty() {
            return Err(Error::Config(
                "Preference file and master key alias cannot be empty".to_string(),
            ));
        }

        for (i, region) in self.regions.iter().enumerate() {
            if region.key.is_empty() {
                return Err(Error::Config("Region key cannot be empty".to_string()));
            }
            if self.regions[..i].iter().any(|r| r.key == region.key) {
                return Err(Error::Config(format!(
                    "Duplicate region key: {}",
                    region.key
                )));
            }
            validate_base_url(&region.base_url)?;
            if region.client_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Region {} has an empty client id",
                    region.key
                )));
            }
        }

        if let Some(app_id) = &self.application_id {
            if app_id.is_empty() || app_id.contains(['/', ':', ' ']) {
                return Err(Error::Config(format!(
                    "Application id is not a valid URL scheme: {}",
                    app_id
                )));
            }
        }

        Ok(())
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let parsed = Url::parse(base_url)
        .map_err(|e| Error::Config(format!("Invalid base URL {}: {}", base_url, e)))?;

    if !matches!(parsed.scheme(), "https" | "http") || parsed.host_str().is_none() {
        return Err(Error::Config(format!(
            "Base URL must be an absolute http(s) URL: {}",
            base_url
        )));
    }
    Ok(())
}

#[cfg(not(feature = "desktop-shims"))]
fn bridge_missing(bridge: &'static str, desktop_default: &str, mobile: &str) -> Error {
    Error::BridgeMissing {
        bridge,
        message: format!(
            "{} implementation is required. \
             Desktop: enable the 'desktop-shims' feature to use the default {}. \
             Mobile: inject {}.",
            bridge, desktop_default, mobile
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::with_timeout(timeout));
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(bridge_missing(
        "HttpClient",
        "ReqwestHttpClient",
        "an OkHttp/URLSession adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_preference_store() -> Result<Arc<dyn PreferenceStore>> {
    use bridge_desktop::FilePreferenceStore;

    let store = FilePreferenceStore::in_data_dir().map_err(|e| {
        Error::DefaultBridge {
            bridge: "PreferenceStore",
            message: e.to_string(),
        }
    })?;
    let store: Arc<dyn PreferenceStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_preference_store() -> Result<Arc<dyn PreferenceStore>> {
    Err(bridge_missing(
        "PreferenceStore",
        "FilePreferenceStore",
        "SharedPreferences/UserDefaults storage",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_key_store() -> Result<Arc<dyn KeyStore>> {
    use bridge_desktop::KeyringKeyStore;

    let store: Arc<dyn KeyStore> = Arc::new(KeyringKeyStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_key_store() -> Result<Arc<dyn KeyStore>> {
    Err(bridge_missing(
        "KeyStore",
        "KeyringKeyStore",
        "the Android Keystore or iOS Keychain",
    ))
}

/// Builder for constructing [`AuthConfig`] instances.
#[derive(Default)]
pub struct AuthConfigBuilder {
    base_url: Option<String>,
    client_id: Option<String>,
    application_id: Option<String>,
    redirect_uri: Option<String>,
    endpoints: EndpointPaths,
    regions: Vec<RegionConfig>,
    request_timeout: Option<Duration>,
    preference_file: Option<String>,
    master_key_alias: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    preference_store: Option<Arc<dyn PreferenceStore>>,
    key_store: Option<Arc<dyn KeyStore>>,
}

impl AuthConfigBuilder {
    /// Sets the identity provider base URL. A trailing slash is dropped.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the host application id used as the callback URL scheme.
    pub fn application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Overrides the derived callback URL.
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointPaths) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Adds a region. Without an explicit base URL the first region added
    /// becomes the active one.
    pub fn region(mut self, region: RegionConfig) -> Self {
        self.regions.push(region);
        self
    }

    pub fn regions(mut self, regions: impl IntoIterator<Item = RegionConfig>) -> Self {
        self.regions.extend(regions);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn preference_file(mut self, name: impl Into<String>) -> Self {
        self.preference_file = Some(name.into());
        self
    }

    pub fn master_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.master_key_alias = Some(alias.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn preference_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.preference_store = Some(store);
        self
    }

    pub fn key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Builds the final `AuthConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(AuthConfig)` on success, or an error if:
    /// - Neither a base URL/client id pair nor a region is configured
    /// - A bridge is missing and no platform default is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<AuthConfig> {
        let (base_url, client_id, active_region) =
            match (self.base_url, self.client_id, self.regions.first()) {
                (Some(url), Some(id), _) => (url, id, None),
                (None, None, Some(region)) => (
                    region.base_url.clone(),
                    region.client_id.clone(),
                    Some(region.key.clone()),
                ),
                (None, _, _) => {
                    return Err(Error::Config(
                        "Base URL is required. Use .base_url() or add a .region().".to_string(),
                    ))
                }
                (_, None, _) => {
                    return Err(Error::Config(
                        "Client id is required. Use .client_id() to set it.".to_string(),
                    ))
                }
            };

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let preference_store = match self.preference_store {
            Some(store) => store,
            None => provide_default_preference_store()?,
        };

        let key_store = match self.key_store {
            Some(store) => store,
            None => provide_default_key_store()?,
        };

        let config = AuthConfig {
            base_url: normalize_base_url(&base_url),
            client_id,
            application_id: self.application_id,
            redirect_uri: self.redirect_uri,
            endpoints: self.endpoints,
            regions: self.regions,
            active_region,
            request_timeout,
            preference_file: self
                .preference_file
                .unwrap_or_else(|| DEFAULT_PREFERENCE_FILE.to_string()),
            master_key_alias: self
                .master_key_alias
                .unwrap_or_else(|| DEFAULT_MASTER_KEY_ALIAS.to_string()),
            http_client,
            preference_store,
            key_store,
        };

        config.validate()?;

        Ok(config)
    }
}
