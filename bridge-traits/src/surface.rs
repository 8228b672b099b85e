//! Rendering Surface Abstraction
//!
//! The surface is the host's embedded web view. The core hands it an authorize
//! URL and waits for the terminal navigation: either a URL under the configured
//! redirect prefix, or the user closing the surface.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Social or SSO shortcut the surface should trigger instead of showing the
/// hosted login page.
#[derive(Clone, PartialEq, Eq)]
pub struct DirectLoginAction {
    /// Action kind understood by the hosted login page (e.g. `social-login`).
    pub action_type: String,
    /// Opaque action payload. May identify the user; never logged.
    pub data: String,
    /// Additional query hints forwarded to the hosted login page.
    pub additional_query_params: BTreeMap<String, String>,
}

impl fmt::Debug for DirectLoginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectLoginAction")
            .field("action_type", &self.action_type)
            .field("data", &"[REDACTED]")
            .field("additional_query_params", &self.additional_query_params)
            .finish()
    }
}

/// What the surface should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// URL to load.
    pub url: String,
    /// Navigations whose URL starts with this prefix end the render.
    pub redirect_prefix: String,
    /// Present for direct logins.
    pub direct_login: Option<DirectLoginAction>,
}

/// Terminal result of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The surface navigated to a URL matching the redirect prefix.
    Redirected(String),
    /// The user dismissed the surface before any redirect.
    Closed,
}

#[async_trait]
pub trait AuthSurface: Send + Sync {
    /// Render `request` and resolve once the navigation is terminal.
    async fn render(&self, request: RenderRequest) -> Result<NavigationOutcome>;
}
