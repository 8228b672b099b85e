//! Observable session state.
//!
//! [`SessionState`] is the single source of truth for "am I logged in". It owns
//! the current [`SessionSnapshot`] and an observer registry. Every distinct
//! snapshot gets a new revision and is pushed to every observer; a snapshot
//! equal to the current one is dropped without notification.
//!
//! Observers run synchronously on the task that changed the state, after the
//! registry lock has been released, so an observer may subscribe, dispose any
//! subscription (its own included) or read the state from inside its callback.
//! Each observer sees revisions in increasing order; a snapshot older than one
//! it already received is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::TokenService;
use crate::credentials::CredentialStore;
use crate::types::{AuthPhase, AuthResponse, SessionSnapshot, User};

type ObserverFn = dyn Fn(&SessionSnapshot) + Send + Sync;

struct Observer {
    id: u64,
    callback: Box<ObserverFn>,
    active: AtomicBool,
    last_revision: AtomicU64,
}

impl Observer {
    /// Deliver `snapshot` unless this observer has been disposed or already saw
    /// the same or a newer revision.
    fn deliver(&self, snapshot: &SessionSnapshot) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        // Stored as revision + 1 so that revision 0 is still delivered.
        let seen = snapshot.revision + 1;
        if self.last_revision.fetch_max(seen, Ordering::AcqRel) >= seen {
            return;
        }
        (self.callback)(snapshot);
    }
}

struct Registry {
    snapshot: SessionSnapshot,
    observers: Vec<Arc<Observer>>,
    next_id: u64,
}

/// Outcome of [`SessionState::gate_interactive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Session is unauthenticated; render the login surface.
    Proceed,
    /// Initialization has not finished; wait and ask again.
    Defer,
    /// A valid session exists; complete without prompting.
    AlreadyAuthenticated,
}

/// Process-wide session state with an observer registry.
pub struct SessionState {
    registry: Arc<Mutex<Registry>>,
    watch: watch::Sender<SessionSnapshot>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(SessionSnapshot::default());
        Self {
            registry: Arc::new(Mutex::new(Registry {
                snapshot: SessionSnapshot::default(),
                observers: Vec::new(),
                next_id: 1,
            })),
            watch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn phase(&self) -> AuthPhase {
        self.lock().snapshot.phase
    }

    pub fn user(&self) -> Option<User> {
        self.lock().snapshot.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().snapshot.is_authenticated()
    }

    pub fn initializing(&self) -> bool {
        self.lock().snapshot.initializing()
    }

    /// Register `callback` and immediately deliver the current snapshot to it.
    ///
    /// The returned [`Subscription`] removes the observer when disposed or
    /// dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let (observer, current) = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            let observer = Arc::new(Observer {
                id,
                callback: Box::new(callback),
                active: AtomicBool::new(true),
                last_revision: AtomicU64::new(0),
            });
            registry.observers.push(observer.clone());
            (observer, registry.snapshot.clone())
        };

        debug!(observer = observer.id, "Session observer attached");
        observer.deliver(&current);

        Subscription {
            registry: Arc::downgrade(&self.registry),
            observer,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Decide, under the state lock, whether an interactive login may render.
    pub fn gate_interactive(&self) -> GateDecision {
        let registry = self.lock();
        match registry.snapshot.phase {
            AuthPhase::Uninitialized | AuthPhase::Initializing => GateDecision::Defer,
            AuthPhase::Authenticated => GateDecision::AlreadyAuthenticated,
            AuthPhase::Unauthenticated => GateDecision::Proceed,
        }
    }

    /// Resolve once the session has left `Uninitialized`/`Initializing`.
    pub async fn wait_until_initialized(&self) -> SessionSnapshot {
        let mut rx = self.watch.subscribe();
        let snapshot = match rx.wait_for(|s| !s.initializing()).await {
            Ok(snapshot) => snapshot.clone(),
            // The sender lives as long as `self`
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    fn update<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let (snapshot, observers) = {
            let mut registry = self.lock();
            let mut next = registry.snapshot.clone();
            change(&mut next);
            if next.same_state(&registry.snapshot) {
                return false;
            }
            next.revision = registry.snapshot.revision + 1;
            registry.snapshot = next.clone();
            self.watch.send_replace(next.clone());
            (next, registry.observers.clone())
        };

        debug!(
            phase = %snapshot.phase,
            is_loading = snapshot.is_loading,
            show_loader = snapshot.show_loader,
            revision = snapshot.revision,
            "Session state changed"
        );
        for observer in observers {
            observer.deliver(&snapshot);
        }
        true
    }

    /// `Uninitialized -> Initializing`. Returns `false` if startup already ran.
    pub(crate) fn begin_initializing(&self) -> bool {
        let mut entered = false;
        self.update(|s| {
            if s.phase == AuthPhase::Uninitialized {
                s.phase = AuthPhase::Initializing;
                entered = true;
            }
        });
        entered
    }

    pub(crate) fn set_authenticated(&self, user: User) {
        self.update(|s| {
            s.phase = AuthPhase::Authenticated;
            s.user = Some(user);
        });
    }

    pub(crate) fn set_unauthenticated(&self) {
        self.update(|s| {
            s.phase = AuthPhase::Unauthenticated;
            s.user = None;
        });
    }

    pub(crate) fn set_loading(&self, is_loading: bool, show_loader: bool) {
        self.update(|s| {
            s.is_loading = is_loading;
            s.show_loader = show_loader;
        });
    }

    /// Persist the tokens from `response`, fetch the profile and enter
    /// `Authenticated`.
    ///
    /// On any failure the session is left `Unauthenticated` and `false` is
    /// returned. Tokens that were persisted stay persisted; only logout or a
    /// store reset removes them. `previous_refresh` is kept when the response
    /// does not rotate the refresh token.
    pub(crate) async fn authenticate(
        &self,
        store: &CredentialStore,
        api: &TokenService,
        response: AuthResponse,
        previous_refresh: Option<&str>,
    ) -> bool {
        let Some(tokens) = response.into_tokens(previous_refresh) else {
            warn!("Token response carried no usable token pair");
            return false;
        };

        if !store.save_session(&tokens).await {
            warn!("Session not persisted, staying unauthenticated");
            return false;
        }

        match api.me().await {
            Some(user) => {
                info!(user_id = %user.id, "Session established");
                self.set_authenticated(user);
                true
            }
            None => {
                warn!("Profile fetch failed, keeping stored tokens");
                self.set_unauthenticated();
                false
            }
        }
    }
}

/// Handle for one registered observer.
///
/// Disposal is idempotent and may happen from inside the observer's own
/// callback. Dropping the handle disposes it.
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    observer: Arc<Observer>,
}

impl Subscription {
    pub fn dispose(&self) {
        if !self.observer.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry.observers.retain(|o| o.id != self.observer.id);
        }
        debug!(observer = self.observer.id, "Session observer detached");
    }

    pub fn is_active(&self) -> bool {
        self.observer.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.observer.id)
            .field("active", &self.is_active())
            .finish()
    }
}
