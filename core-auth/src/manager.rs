//! # Authentication Manager
//!
//! The process-wide session context. One `AuthManager` is constructed at
//! startup, shared by `Arc`, and owns every other auth component.
//!
//! ## Overview
//!
//! The manager:
//! - opens the credential store (recovering from a corrupted master key)
//! - resolves the active region from the persisted selection
//! - restores the stored session in the background
//! - runs login attempts on spawned tasks
//! - serializes token refreshes
//! - emits [`AuthEvent`]s on the event bus
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthManager, CompletionCallback, LoginRequest};
//! use core_runtime::AuthConfig;
//! # use bridge_traits::surface::AuthSurface;
//! # use std::sync::Arc;
//!
//! # async fn example(surface: Arc<dyn AuthSurface>) -> core_auth::Result<()> {
//! let config = AuthConfig::builder()
//!     .base_url("https://auth.example.com")
//!     .client_id("client-id")
//!     .build()?;
//!
//! let manager = AuthManager::builder(config, surface).initialize().await?;
//! manager.wait_until_initialized().await;
//!
//! if !manager.session().is_authenticated() {
//!     let handle = manager.login(LoginRequest::Standard, CompletionCallback::none());
//!     let outcome = handle.wait().await?;
//!     println!("login finished: {:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```

use bridge_traits::surface::AuthSurface;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::AuthConfig;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::TokenService;
use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::login::{bind_host_ui, CompletionCallback, HostUi, LoginOrchestrator, LoginOutcome, LoginRequest};
use crate::pkce::AuthorizeUrlGenerator;
use crate::session::{SessionState, Subscription};
use crate::types::{AuthTokens, CredentialKey, SessionSnapshot};

/// Handle for one spawned login attempt.
#[derive(Debug)]
pub struct LoginHandle {
    attempt_id: Uuid,
    task: JoinHandle<Result<LoginOutcome>>,
}

impl LoginHandle {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Wait for the attempt to finish.
    pub async fn wait(self) -> Result<LoginOutcome> {
        self.task
            .await
            .map_err(|e| AuthError::Other(format!("Login task failed: {}", e)))?
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Builder for [`AuthManager`].
pub struct AuthManagerBuilder {
    config: AuthConfig,
    surface: Arc<dyn AuthSurface>,
    host: Option<Arc<dyn HostUi>>,
    events: Option<EventBus>,
}

impl AuthManagerBuilder {
    pub fn host_ui(mut self, host: Arc<dyn HostUi>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Open storage, resolve the region and start restoring the session.
    ///
    /// Returns once the store is usable. The session is restored on a spawned
    /// task; use [`AuthManager::wait_until_initialized`] to wait for it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidConfig`] if the configuration is invalid
    /// - [`AuthError::SecureStorageUnavailable`] if the credential store cannot
    ///   be opened even after recovery
    #[instrument(skip(self))]
    pub async fn initialize(self) -> Result<Arc<AuthManager>> {
        self.config.validate()?;
        let events = self.events.unwrap_or_default();
        let _ = events.emit(CoreEvent::Auth(AuthEvent::Initializing));

        let store = match CredentialStore::open(&self.config).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Secure storage unavailable");
                let _ = events.emit(CoreEvent::Auth(AuthEvent::AuthError {
                    message: e.to_string(),
                    recoverable: false,
                }));
                return Err(e);
            }
        };

        let config = resolve_region(self.config, &store).await;
        if store.recovered() {
            let region_preserved = store.get(CredentialKey::SelectedRegion).await.is_some();
            let _ = events.emit(CoreEvent::Auth(AuthEvent::StorageRecovered { region_preserved }));
        }

        let session = Arc::new(SessionState::new());
        let api = Arc::new(TokenService::new(&config, store.clone()));
        let generator = Arc::new(AuthorizeUrlGenerator::new(&config, store.clone()));
        let mut orchestrator = LoginOrchestrator::new(
            session.clone(),
            store.clone(),
            api.clone(),
            generator,
            self.surface,
            events.clone(),
        );
        let host_binding = match &self.host {
            Some(host) => {
                orchestrator = orchestrator.with_host_ui(host.clone());
                Some(bind_host_ui(&session, host.clone()))
            }
            None => None,
        };

        let manager = Arc::new(AuthManager {
            config,
            session,
            store,
            api,
            orchestrator: Arc::new(orchestrator),
            events,
            refresh_lock: Arc::new(Mutex::new(())),
            _host_binding: host_binding,
        });

        manager.session.begin_initializing();
        // Held until the restore settles; refreshes requested meanwhile wait on it.
        let held = manager.refresh_lock.clone().try_lock_owned();
        let restoring = manager.clone();
        tokio::spawn(async move {
            let held = match held {
                Ok(held) => held,
                Err(_) => restoring.refresh_lock.clone().lock_owned().await,
            };
            restoring.restore(held).await
        });

        info!(region = ?manager.active_region(), "Auth manager initialized");
        Ok(manager)
    }
}

/// Pick the stored region if it is one of the configured regions.
async fn resolve_region(config: AuthConfig, store: &CredentialStore) -> AuthConfig {
    if config.regions.is_empty() {
        return config;
    }
    let Some(selected) = store.get(CredentialKey::SelectedRegion).await else {
        return config;
    };
    match config.with_active_region(&selected) {
        Some(resolved) => {
            debug!(region = %selected, "Using stored region");
            resolved
        }
        None => {
            warn!(region = %selected, "Stored region is not configured, using default");
            config
        }
    }
}

/// Process-wide authentication context.
pub struct AuthManager {
    config: AuthConfig,
    session: Arc<SessionState>,
    store: Arc<CredentialStore>,
    api: Arc<TokenService>,
    orchestrator: Arc<LoginOrchestrator>,
    events: EventBus,
    refresh_lock: Arc<Mutex<()>>,
    _host_binding: Option<Subscription>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("base_url", &self.config.base_url)
            .field("region", &self.config.active_region)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn builder(config: AuthConfig, surface: Arc<dyn AuthSurface>) -> AuthManagerBuilder {
        AuthManagerBuilder {
            config,
            surface,
            host: None,
            events: None,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn active_region(&self) -> Option<&str> {
        self.config.active_region.as_deref()
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Observe the session. See [`SessionState::subscribe`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.session.subscribe(callback)
    }

    pub async fn wait_until_initialized(&self) -> SessionSnapshot {
        self.session.wait_until_initialized().await
    }

    #[instrument(skip(self, held))]
    async fn restore(&self, held: OwnedMutexGuard<()>) {
        let Some(tokens) = self.store.tokens().await else {
            debug!("No stored session");
            self.session.set_unauthenticated();
            return;
        };

        if self.refresh_locked(&held, &tokens, true).await {
            self.emit_signed_in();
        } else {
            warn!("Stored session could not be restored");
            self.session.set_unauthenticated();
        }
    }

    /// Refresh the stored session.
    ///
    /// Only one refresh runs at a time. A caller arriving while one is in flight
    /// waits for it and gets its result instead of starting another.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> bool {
        let held = match self.refresh_lock.clone().try_lock_owned() {
            Ok(held) => held,
            Err(_) => {
                debug!("Refresh already in flight, waiting for it");
                let _wait = self.refresh_lock.lock().await;
                return self.session.is_authenticated();
            }
        };

        let Some(tokens) = self.store.tokens().await else {
            self.session.set_unauthenticated();
            return false;
        };

        let refreshed = self.refresh_locked(&held, &tokens, false).await;
        if refreshed {
            let _ = self.events.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed));
        } else {
            warn!("Token refresh failed");
            self.session.set_unauthenticated();
            let _ = self.events.emit(CoreEvent::Auth(AuthEvent::SignedOut {
                reason: "refresh failed".to_string(),
            }));
        }
        refreshed
    }

    /// Trade the stored refresh token and settle the session on the result.
    ///
    /// Only called with `refresh_lock` held. Stored tokens are never removed
    /// here, whatever the outcome.
    async fn refresh_locked(
        &self,
        _held: &OwnedMutexGuard<()>,
        tokens: &AuthTokens,
        show_loader: bool,
    ) -> bool {
        self.session.set_loading(true, show_loader);
        let refreshed = match self.api.refresh_token(&tokens.refresh_token).await {
            Some(response) => {
                self.session
                    .authenticate(&self.store, &self.api, response, Some(&tokens.refresh_token))
                    .await
            }
            None => false,
        };
        self.session.set_loading(false, false);
        refreshed
    }

    /// Sign out locally, notifying the server on a best-effort basis.
    ///
    /// Local credentials are cleared whether or not the server was reachable.
    /// The selected region is kept.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.api.logout().await;
        if !self.store.clear().await {
            error!("Credentials could not be cleared");
        }
        self.session.set_unauthenticated();
        let _ = self.events.emit(CoreEvent::Auth(AuthEvent::SignedOut {
            reason: "logout".to_string(),
        }));
        info!("Logged out");
    }

    /// Persist `key` as the region to use from the next initialization.
    pub async fn select_region(&self, key: &str) -> Result<()> {
        if self.config.region(key).is_none() {
            return Err(AuthError::UnknownRegion(key.to_string()));
        }
        if !self.store.save(CredentialKey::SelectedRegion, key).await {
            return Err(AuthError::Other(format!("Failed to persist region {}", key)));
        }
        info!(region = key, "Region selected, applies on next initialize");
        Ok(())
    }

    /// Start a login attempt on a spawned task.
    pub fn login(self: &Arc<Self>, request: LoginRequest, completion: CompletionCallback) -> LoginHandle {
        let manager = self.clone();
        self.spawn_attempt(async move { manager.orchestrator.run(request, completion).await })
    }

    /// Resume an attempt interrupted by host UI recreation.
    pub fn resume_login(self: &Arc<Self>, completion: CompletionCallback) -> LoginHandle {
        let manager = self.clone();
        self.spawn_attempt(async move { manager.orchestrator.resume(completion).await })
    }

    fn spawn_attempt<F>(self: &Arc<Self>, attempt: F) -> LoginHandle
    where
        F: std::future::Future<Output = Result<LoginOutcome>> + Send + 'static,
    {
        let attempt_id = Uuid::new_v4();
        let manager = self.clone();
        let task = tokio::spawn(async move {
            debug!(%attempt_id, "Login attempt started");
            let outcome = attempt.await;
            if let Ok(LoginOutcome::Authenticated(_)) = &outcome {
                manager.emit_signed_in();
            }
            outcome
        });
        LoginHandle { attempt_id, task }
    }

    fn emit_signed_in(&self) {
        if let Some(user) = self.session.user() {
            let _ = self.events.emit(CoreEvent::Auth(AuthEvent::SignedIn {
                user_id: user.id,
                region: self.config.active_region.clone(),
            }));
        }
    }
}
