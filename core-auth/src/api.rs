//! Token service: the only component that talks to the identity provider.
//!
//! Every call returns `None` (or nothing, for logout) on transport or protocol
//! failure. Errors are logged here and never cross the service boundary; the
//! caller decides whether that means "cancel login" or "stay logged out".

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::{AuthConfig, EndpointPaths};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::{AuthResponse, CredentialKey, User};

pub struct TokenService {
    base_url: String,
    client_id: String,
    endpoints: EndpointPaths,
    timeout: Duration,
    http_client: Arc<dyn HttpClient>,
    store: Arc<CredentialStore>,
}

impl TokenService {
    pub fn new(config: &AuthConfig, store: Arc<CredentialStore>) -> Self {
        Self {
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            endpoints: config.endpoints.clone(),
            timeout: config.request_timeout,
            http_client: config.http_client.clone(),
            store,
        }
    }

    /// Exchange an authorization code for tokens.
    #[instrument(skip(self, code, code_verifier))]
    pub async fn exchange_token(
        &self,
        code: &str,
        redirect_url: &str,
        code_verifier: &str,
    ) -> Option<AuthResponse> {
        let body = json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_url,
            "code_verifier": code_verifier,
        });
        let request = self.post(&self.endpoints.exchange_token, &body, &[]).await;
        self.call("exchange_token", request).await
    }

    /// Trade a refresh token for a new access token.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Option<AuthResponse> {
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });
        let request = self.post(&self.endpoints.refresh_token, &body, &[]).await;
        self.call("refresh_token", request).await
    }

    /// Fetch the signed-in user's profile with the stored access token.
    #[instrument(skip(self))]
    pub async fn me(&self) -> Option<User> {
        let request = self.prepare(HttpMethod::Get, &self.endpoints.me, &[]).await;
        self.call("me", Ok(request)).await
    }

    /// Best-effort server-side logout.
    ///
    /// The stored access token is sent in the `fe_refresh_{client_id}` header,
    /// which is what the provider's logout endpoint reads.
    /// Nothing is sent when no session is stored.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let Some(access_token) = self.store.get(CredentialKey::AccessToken).await else {
            debug!("No stored session, skipping logout request");
            return;
        };

        let header = format!("fe_refresh_{}", self.client_id);
        let request = self
            .post(
                &self.endpoints.logout,
                &json!({}),
                &[(header.as_str(), access_token.as_str())],
            )
            .await;

        match request {
            Ok(request) => match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => debug!("Logged out on server"),
                Ok(response) => warn!(status = response.status, "Logout rejected by server"),
                Err(e) => warn!(error = %e, "Logout request failed"),
            },
            Err(e) => warn!(error = %e, "Failed to build logout request"),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpRequest> {
        self.prepare(HttpMethod::Post, path, extra_headers)
            .await
            .json(body)
            .map_err(AuthError::from)
    }

    async fn prepare(
        &self,
        method: HttpMethod,
        path: &str,
        extra_headers: &[(&str, &str)],
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, format!("{}/{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Origin", self.base_url.clone())
            .timeout(self.timeout);

        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        if let Some(access_token) = self.store.get(CredentialKey::AccessToken).await {
            request = request.bearer_token(access_token);
        }
        request
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: Result<HttpRequest>,
    ) -> Option<T> {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(operation, error = %e, "Failed to build request");
                return None;
            }
        };

        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation, error = %e, "Request failed");
                return None;
            }
        };

        match decode(&response) {
            Ok(value) => {
                debug!(operation, status = response.status, "Request succeeded");
                Some(value)
            }
            Err(e) => {
                warn!(operation, status = response.status, error = %e, "Unusable response");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    if !response.is_success() {
        return Err(AuthError::Other(format!("HTTP {}", response.status)));
    }
    serde_json::from_slice(&response.body).map_err(|e| AuthError::Serialization(e.to_string()))
}
