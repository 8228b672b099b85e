//! Login orchestration.
//!
//! A [`LoginOrchestrator`] drives one attempt end to end: generate the
//! challenge, gate on the session, render, parse the redirect, exchange the
//! code and settle the session. Three entry flows share that path:
//!
//! - **Standard**: interactive login through the hosted page.
//! - **Direct**: the host supplies a pre-established identity assertion, which
//!   the surface injects into the hosted page (`prompt=consent`).
//! - **Post-auth return**: no token work, only brings the host UI back to its
//!   authenticated screen.
//!
//! # Launch guard
//!
//! The flags below are persisted in the credential store so a recreated host
//! UI can tell whether a flow was interrupted:
//!
//! | Event                                  | Persisted change                          |
//! |----------------------------------------|-------------------------------------------|
//! | standard flow renders                  | `authLaunched = true`                     |
//! | direct flow renders                    | `directLoginLaunched = true`, type, data  |
//! | direct exchange succeeds               | `directLoginLaunchedDone = true`          |
//! | completion delivered, or cancellation  | all guard keys removed                    |
//!
//! On re-entry with `directLoginLaunchedDone` set the orchestrator delivers the
//! completion immediately and performs no exchange.

use bridge_traits::surface::{AuthSurface, DirectLoginAction, NavigationOutcome, RenderRequest};
use core_runtime::events::{CoreEvent, EventBus, LoginEvent};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::TokenService;
use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::pkce::AuthorizeUrlGenerator;
use crate::session::{GateDecision, SessionState, Subscription};
use crate::types::{AuthPhase, CredentialKey, User};

const TRUE: &str = "true";

/// Host UI callbacks.
///
/// Called synchronously from the core; marshal to the UI thread inside the
/// implementation if needed.
pub trait HostUi: Send + Sync {
    fn on_show_loader(&self, _show: bool) {}
    fn on_authenticated(&self, _user: &User) {}
    fn on_unauthenticated(&self) {}
    fn on_login_cancelled(&self) {}
}

/// Forward session changes to `host`.
///
/// `on_show_loader` fires whenever the loader flag changes and
/// `on_unauthenticated` whenever the session enters `Unauthenticated`. The
/// orchestrator signals `on_authenticated` itself when a login completes.
pub fn bind_host_ui(session: &SessionState, host: Arc<dyn HostUi>) -> Subscription {
    let last: Mutex<Option<(AuthPhase, bool)>> = Mutex::new(None);
    session.subscribe(move |snapshot| {
        let previous = {
            let mut last = last.lock().unwrap_or_else(|p| p.into_inner());
            last.replace((snapshot.phase, snapshot.show_loader))
        };
        let (phase_changed, loader_changed) = match previous {
            Some((phase, loader)) => (phase != snapshot.phase, loader != snapshot.show_loader),
            None => (true, true),
        };

        if loader_changed {
            host.on_show_loader(snapshot.show_loader);
        }
        if phase_changed && snapshot.phase == AuthPhase::Unauthenticated {
            host.on_unauthenticated();
        }
    })
}

/// What the caller asked for.
#[derive(Clone, PartialEq, Eq)]
pub enum LoginRequest {
    Standard,
    Direct { login_type: String, data: String },
    PostAuthReturn,
}

impl LoginRequest {
    pub fn flow(&self) -> &'static str {
        match self {
            LoginRequest::Standard => "standard",
            LoginRequest::Direct { .. } => "direct",
            LoginRequest::PostAuthReturn => "post_auth",
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginRequest::Standard => write!(f, "Standard"),
            LoginRequest::Direct { login_type, .. } => f
                .debug_struct("Direct")
                .field("login_type", login_type)
                .field("data", &"[REDACTED]")
                .finish(),
            LoginRequest::PostAuthReturn => write!(f, "PostAuthReturn"),
        }
    }
}

/// The flow an attempt resolved to, after consulting the launch guard.
#[derive(Clone, PartialEq, Eq)]
pub enum PendingLoginRequest {
    StandardLogin { authorize_url: String },
    DirectLogin { login_type: String, data: String },
    PostAuthReturn,
}

impl fmt::Debug for PendingLoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingLoginRequest::StandardLogin { authorize_url } => f
                .debug_struct("StandardLogin")
                .field("authorize_url", authorize_url)
                .finish(),
            PendingLoginRequest::DirectLogin { login_type, .. } => f
                .debug_struct("DirectLogin")
                .field("login_type", login_type)
                .field("data", &"[REDACTED]")
                .finish(),
            PendingLoginRequest::PostAuthReturn => write!(f, "PostAuthReturn"),
        }
    }
}

/// Persisted launch guard.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LaunchState {
    pub auth_launched: bool,
    pub direct_login_launched: bool,
    pub direct_login_launched_done: bool,
    pub direct_login_type: Option<String>,
    pub direct_login_data: Option<String>,
}

impl fmt::Debug for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchState")
            .field("auth_launched", &self.auth_launched)
            .field("direct_login_launched", &self.direct_login_launched)
            .field("direct_login_launched_done", &self.direct_login_launched_done)
            .field("direct_login_type", &self.direct_login_type)
            .field("direct_login_data", &self.direct_login_data.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl LaunchState {
    pub async fn load(store: &CredentialStore) -> Self {
        let flag = |value: Option<String>| value.as_deref() == Some(TRUE);
        Self {
            auth_launched: flag(store.get(CredentialKey::AuthLaunched).await),
            direct_login_launched: flag(store.get(CredentialKey::DirectLoginLaunched).await),
            direct_login_launched_done: flag(
                store.get(CredentialKey::DirectLoginLaunchedDone).await,
            ),
            direct_login_type: store.get(CredentialKey::DirectLoginType).await,
            direct_login_data: store.get(CredentialKey::DirectLoginData).await,
        }
    }

    /// Replace the persisted guard with `self` in one commit.
    pub async fn persist(&self, store: &CredentialStore) -> bool {
        let mut puts: Vec<(CredentialKey, &str)> = Vec::new();
        let mut removes = Vec::new();

        for (key, set) in [
            (CredentialKey::AuthLaunched, self.auth_launched),
            (CredentialKey::DirectLoginLaunched, self.direct_login_launched),
            (CredentialKey::DirectLoginLaunchedDone, self.direct_login_launched_done),
        ] {
            if set {
                puts.push((key, TRUE));
            } else {
                removes.push(key);
            }
        }
        for (key, value) in [
            (CredentialKey::DirectLoginType, &self.direct_login_type),
            (CredentialKey::DirectLoginData, &self.direct_login_data),
        ] {
            match value {
                Some(value) => puts.push((key, value.as_str())),
                None => removes.push(key),
            }
        }

        store.update(&puts, &removes).await
    }

    pub async fn reset(store: &CredentialStore) -> bool {
        store.remove_many(&CredentialKey::LAUNCH_GUARD).await
    }

    /// At most one flow may be launched but not done.
    pub fn in_flight(&self) -> bool {
        self.auth_launched || (self.direct_login_launched && !self.direct_login_launched_done)
    }

    fn standard() -> Self {
        Self {
            auth_launched: true,
            ..Self::default()
        }
    }

    fn direct(login_type: &str, data: &str) -> Self {
        Self {
            direct_login_launched: true,
            direct_login_type: Some(login_type.to_string()),
            direct_login_data: Some(data.to_string()),
            ..Self::default()
        }
    }
}

/// One-shot completion handler owned by a single attempt.
pub struct CompletionCallback(Option<Box<dyn FnOnce() + Send>>);

impl CompletionCallback {
    pub fn new<F: FnOnce() + Send + 'static>(callback: F) -> Self {
        Self(Some(Box::new(callback)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    /// Run the callback. Later calls do nothing.
    pub fn invoke(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

impl Default for CompletionCallback {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for CompletionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompletionCallback")
            .field(&self.is_pending())
            .finish()
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// The exchange succeeded and the session is authenticated.
    Authenticated(User),
    /// A valid session already existed; nothing was rendered.
    AlreadyAuthenticated,
    /// A completed direct login was replayed from the launch guard.
    Replayed,
    /// Post-auth return; no token work.
    Returned,
    Cancelled(String),
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, LoginOutcome::Cancelled(_))
    }
}

/// Parsed terminal redirect.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(String),
    Error(String),
}

fn parse_callback(url: &str, redirect_prefix: &str) -> Option<Callback> {
    if !url.starts_with(redirect_prefix) {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (name, value) in parsed.query_pairs() {
        match name.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) => Some(Callback::Error(match description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        })),
        (None, Some(code)) => Some(Callback::Code(code)),
        (None, None) => None,
    }
}

/// Drives login attempts against one session.
pub struct LoginOrchestrator {
    session: Arc<SessionState>,
    store: Arc<CredentialStore>,
    api: Arc<TokenService>,
    generator: Arc<AuthorizeUrlGenerator>,
    surface: Arc<dyn AuthSurface>,
    host: Option<Arc<dyn HostUi>>,
    events: EventBus,
    in_flight: AsyncMutex<()>,
}

impl LoginOrchestrator {
    pub fn new(
        session: Arc<SessionState>,
        store: Arc<CredentialStore>,
        api: Arc<TokenService>,
        generator: Arc<AuthorizeUrlGenerator>,
        surface: Arc<dyn AuthSurface>,
        events: EventBus,
    ) -> Self {
        Self {
            session,
            store,
            api,
            generator,
            surface,
            host: None,
            events,
            in_flight: AsyncMutex::new(()),
        }
    }

    pub fn with_host_ui(mut self, host: Arc<dyn HostUi>) -> Self {
        self.host = Some(host);
        self
    }

    /// Run one attempt to completion.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::LoginInProgress`] if another standard or direct
    /// attempt is running. Every other failure is a
    /// [`LoginOutcome::Cancelled`].
    #[instrument(skip(self, completion), fields(flow = request.flow()))]
    pub async fn run(
        &self,
        request: LoginRequest,
        mut completion: CompletionCallback,
    ) -> Result<LoginOutcome> {
        if request == LoginRequest::PostAuthReturn {
            return Ok(self.post_auth_return());
        }

        let _attempt = self
            .in_flight
            .try_lock()
            .map_err(|_| AuthError::LoginInProgress)?;

        let guard = LaunchState::load(&self.store).await;
        if guard.direct_login_launched_done {
            return Ok(self.replay(&mut completion).await);
        }
        if guard.in_flight() {
            debug!(?guard, "Discarding launch guard left by an earlier process");
        }

        Ok(self.attempt(request, &mut completion).await)
    }

    /// Resume whatever the persisted launch guard says was interrupted.
    #[instrument(skip(self, completion))]
    pub async fn resume(&self, mut completion: CompletionCallback) -> Result<LoginOutcome> {
        let _attempt = self
            .in_flight
            .try_lock()
            .map_err(|_| AuthError::LoginInProgress)?;

        let guard = LaunchState::load(&self.store).await;
        if guard.direct_login_launched_done {
            return Ok(self.replay(&mut completion).await);
        }

        if guard.direct_login_launched {
            return match (guard.direct_login_type, guard.direct_login_data) {
                (Some(login_type), Some(data)) => Ok(self
                    .attempt(LoginRequest::Direct { login_type, data }, &mut completion)
                    .await),
                _ => Ok(self
                    .cancel("direct", "Direct login type or data missing")
                    .await),
            };
        }

        if guard.auth_launched {
            return Ok(self.attempt(LoginRequest::Standard, &mut completion).await);
        }

        Ok(self.post_auth_return())
    }

    async fn attempt(&self, request: LoginRequest, completion: &mut CompletionCallback) -> LoginOutcome {
        let flow = request.flow();

        let (extra, guard, direct) = match &request {
            LoginRequest::Direct { login_type, data } => {
                if login_type.is_empty() || data.is_empty() {
                    return self.cancel(flow, "Direct login type or data missing").await;
                }
                let mut additional_query_params = BTreeMap::new();
                additional_query_params.insert("prompt".to_string(), "consent".to_string());
                (
                    vec![("prompt", "consent")],
                    LaunchState::direct(login_type, data),
                    Some(DirectLoginAction {
                        action_type: login_type.clone(),
                        data: data.clone(),
                        additional_query_params,
                    }),
                )
            }
            _ => (Vec::new(), LaunchState::standard(), None),
        };

        loop {
            match self.session.gate_interactive() {
                GateDecision::Proceed => break,
                GateDecision::Defer => {
                    debug!("Session still initializing, deferring render");
                    self.session.wait_until_initialized().await;
                }
                GateDecision::AlreadyAuthenticated => {
                    info!("Session already authenticated, skipping login surface");
                    LaunchState::reset(&self.store).await;
                    completion.invoke();
                    if let (Some(host), Some(user)) = (&self.host, self.session.user()) {
                        host.on_authenticated(&user);
                    }
                    return LoginOutcome::AlreadyAuthenticated;
                }
            }
        }

        let challenge = match self.generator.generate(&extra).await {
            Ok(challenge) => challenge,
            Err(e) => return self.cancel(flow, &e.to_string()).await,
        };
        let pending = match request {
            LoginRequest::Direct { login_type, data } => {
                PendingLoginRequest::DirectLogin { login_type, data }
            }
            _ => PendingLoginRequest::StandardLogin {
                authorize_url: challenge.launch_url().to_string(),
            },
        };
        debug!(?pending, "Login attempt planned");

        if !guard.persist(&self.store).await {
            warn!("Launch guard not persisted; an interrupted attempt cannot be resumed");
        }
        self.emit(LoginEvent::Started {
            flow: flow.to_string(),
        });

        let render = RenderRequest {
            url: challenge.launch_url().to_string(),
            redirect_prefix: self.generator.redirect_url().to_string(),
            direct_login: direct,
        };
        let redirected = match self.surface.render(render).await {
            Ok(NavigationOutcome::Redirected(url)) => url,
            Ok(NavigationOutcome::Closed) => return self.cancel(flow, "Surface closed").await,
            Err(e) => return self.cancel(flow, &e.to_string()).await,
        };

        let code = match parse_callback(&redirected, self.generator.redirect_url()) {
            Some(Callback::Code(code)) => code,
            Some(Callback::Error(error)) => return self.cancel(flow, &error).await,
            None => return self.cancel(flow, "Redirect carried no code").await,
        };

        self.session.set_loading(true, true);
        let Some(response) = self
            .api
            .exchange_token(&code, self.generator.redirect_url(), &challenge.code_verifier)
            .await
        else {
            return self.cancel(flow, "Token exchange failed").await;
        };

        if !self
            .session
            .authenticate(&self.store, &self.api, response, None)
            .await
        {
            return self.cancel(flow, "Session could not be established").await;
        }

        if guard.direct_login_launched {
            let done = LaunchState {
                direct_login_launched_done: true,
                ..guard
            };
            done.persist(&self.store).await;
        }

        completion.invoke();
        LaunchState::reset(&self.store).await;
        self.session.set_loading(false, false);

        let user = self.session.user().unwrap_or_default();
        if let Some(host) = &self.host {
            host.on_authenticated(&user);
        }
        self.emit(LoginEvent::Completed {
            flow: flow.to_string(),
        });
        info!(flow, "Login completed");
        LoginOutcome::Authenticated(user)
    }

    async fn replay(&self, completion: &mut CompletionCallback) -> LoginOutcome {
        info!("Direct login already completed, delivering completion");
        completion.invoke();
        self.session.set_loading(false, false);
        LaunchState::reset(&self.store).await;
        self.emit(LoginEvent::Completed {
            flow: "direct".to_string(),
        });
        LoginOutcome::Replayed
    }

    fn post_auth_return(&self) -> LoginOutcome {
        if let (Some(host), Some(user)) = (&self.host, self.session.user()) {
            host.on_authenticated(&user);
        }
        LoginOutcome::Returned
    }

    async fn cancel(&self, flow: &str, reason: &str) -> LoginOutcome {
        warn!(flow, reason, "Login cancelled");
        LaunchState::reset(&self.store).await;
        self.session.set_loading(false, false);
        if let Some(host) = &self.host {
            host.on_login_cancelled();
        }
        self.emit(LoginEvent::Cancelled {
            flow: flow.to_string(),
            reason: reason.to_string(),
        });
        LoginOutcome::Cancelled(reason.to_string())
    }

    fn emit(&self, event: LoginEvent) {
        // No subscribers is not an error
        let _ = self.events.emit(CoreEvent::Login(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_code() {
        assert_eq!(
            parse_callback("https://app/callback?code=abc123&state=x", "https://app/callback"),
            Some(Callback::Code("abc123".to_string()))
        );
    }

    #[test]
    fn test_parse_callback_error_wins() {
        assert_eq!(
            parse_callback(
                "https://app/callback?code=abc&error=access_denied&error_description=nope",
                "https://app/callback"
            ),
            Some(Callback::Error("access_denied: nope".to_string()))
        );
    }

    #[test]
    fn test_parse_callback_rejects_foreign_or_empty() {
        assert_eq!(parse_callback("https://evil/callback?code=abc", "https://app/callback"), None);
        assert_eq!(parse_callback("https://app/callback", "https://app/callback"), None);
        assert_eq!(parse_callback("https://app/callback?code=", "https://app/callback"), None);
    }

    #[test]
    fn test_launch_state_in_flight() {
        assert!(!LaunchState::default().in_flight());
        assert!(LaunchState::standard().in_flight());
        let mut direct = LaunchState::direct("social-login", "payload");
        assert!(direct.in_flight());
        direct.direct_login_launched_done = true;
        assert!(!direct.in_flight());
    }

    #[test]
    fn test_launch_state_debug_redacts_data() {
        let debug = format!("{:?}", LaunchState::direct("social-login", "secret-payload"));
        assert!(!debug.contains("secret-payload"));
    }

    #[test]
    fn test_completion_runs_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let inner = count.clone();
        let mut completion = CompletionCallback::new(move || {
            inner.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        completion.invoke();
        completion.invoke();

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!completion.is_pending());
    }
}
