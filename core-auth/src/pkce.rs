//! PKCE challenge generation and authorize URL construction (RFC 7636, S256).
//!
//! Every login first passes through the provider's logout endpoint so a stale
//! provider-side session cookie cannot silently satisfy the authorize request.
//! The URL handed to the rendering surface is therefore
//! `{base}/frontegg/oauth/logout?post_logout_redirect_uri=<authorize url>`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use core_runtime::AuthConfig;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::CredentialKey;

const RANDOM_LEN: usize = 16;
const SCOPE: &str = "openid email profile";

/// Random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `base64url_nopad(SHA256(verifier))`.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// One login attempt's PKCE material and URLs.
///
/// Only `code_verifier` is persisted. The exchange uses the in-memory copy.
#[derive(Clone)]
pub struct AuthorizeChallenge {
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
    /// `{base}/oauth/authorize?...`
    pub authorize_url: String,
    /// The logout URL wrapping `authorize_url`. This is the one to render.
    pub logout_redirect_url: String,
}

impl AuthorizeChallenge {
    /// URL the rendering surface should load.
    pub fn launch_url(&self) -> &str {
        &self.logout_redirect_url
    }
}

impl fmt::Debug for AuthorizeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizeChallenge")
            .field("nonce", &self.nonce)
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("authorize_url", &self.authorize_url)
            .finish()
    }
}

/// Builds authorize URLs for one configured tenant.
pub struct AuthorizeUrlGenerator {
    base_url: String,
    client_id: String,
    redirect_url: String,
    store: Arc<CredentialStore>,
}

impl AuthorizeUrlGenerator {
    pub fn new(config: &AuthConfig, store: Arc<CredentialStore>) -> Self {
        Self {
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            redirect_url: config.redirect_url(),
            store,
        }
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Generate a fresh challenge and persist its verifier.
    ///
    /// `extra_params` are appended to the authorize query after the standard
    /// parameters (for example `prompt=consent`). A failed verifier write is
    /// logged and the challenge is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the base URL cannot be parsed.
    #[instrument(skip(self, extra_params))]
    pub async fn generate(&self, extra_params: &[(&str, &str)]) -> Result<AuthorizeChallenge> {
        let nonce = random_string(RANDOM_LEN);
        let code_verifier = random_string(RANDOM_LEN);
        let code_challenge = code_challenge(&code_verifier);

        if !self
            .store
            .save(CredentialKey::CodeVerifier, &code_verifier)
            .await
        {
            warn!("Code verifier not persisted; login must finish in this process");
        }

        let mut authorize = self.endpoint("oauth/authorize")?;
        {
            let mut query = authorize.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("scope", SCOPE);
            query.append_pair("redirect_uri", &self.redirect_url);
            query.append_pair("code_challenge", &code_challenge);
            query.append_pair("code_challenge_method", "S256");
            query.append_pair("nonce", &nonce);
            for (name, value) in extra_params {
                query.append_pair(name, value);
            }
        }
        let authorize_url = authorize.to_string();

        let mut logout = self.endpoint("frontegg/oauth/logout")?;
        logout
            .query_pairs_mut()
            .append_pair("post_logout_redirect_uri", &authorize_url);

        debug!(authorize_url = %authorize_url, "Generated authorize URL");

        Ok(AuthorizeChallenge {
            nonce,
            code_verifier,
            code_challenge,
            authorize_url,
            logout_redirect_url: logout.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid base URL: {}", e)))
    }
}
