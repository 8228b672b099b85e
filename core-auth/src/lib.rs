//! # Authentication Module
//!
//! Embedded OAuth 2.0 / OIDC login with PKCE and a persistent session.
//!
//! ## Overview
//!
//! This crate is the session core: it builds authorize URLs, exchanges codes
//! and refresh tokens, keeps credentials encrypted at rest and exposes the
//! observable session state that host UIs render from. Rendering the login
//! page is delegated to an [`AuthSurface`](bridge_traits::surface::AuthSurface)
//! supplied by the host.
//!
//! ## Features
//!
//! - PKCE (S256) authorize URLs wrapped in a provider logout redirect
//! - AES-256-GCM credential store with master-key corruption recovery
//! - Observer registry with idempotent, self-disposable subscriptions
//! - Standard, direct and post-auth login flows with a persisted launch guard
//! - Multi-region selection that survives credential resets
//! - Auth state event emission

pub mod api;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod login;
pub mod manager;
pub mod pkce;
pub mod session;
pub mod types;

pub use api::TokenService;
pub use credentials::CredentialStore;
pub use error::{AuthError, Result};
pub use login::{
    bind_host_ui, CompletionCallback, HostUi, LaunchState, LoginOrchestrator, LoginOutcome,
    LoginRequest, PendingLoginRequest,
};
pub use manager::{AuthManager, AuthManagerBuilder, LoginHandle};
pub use pkce::{AuthorizeChallenge, AuthorizeUrlGenerator};
pub use session::{GateDecision, SessionState, Subscription};
pub use types::{AuthPhase, AuthResponse, AuthTokens, CredentialKey, SessionSnapshot, User};
