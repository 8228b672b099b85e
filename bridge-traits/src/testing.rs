//! In-memory bridge doubles for tests.
//!
//! Enabled with the `test-support` feature. Every double is cheap to clone and
//! shares its state between clones so a test can keep a handle for inspection
//! after moving one into the code under test.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, Result};
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::storage::{KeyStore, PreferenceStore};
use crate::surface::{AuthSurface, NavigationOutcome, RenderRequest};

fn poisoned() -> BridgeError {
    BridgeError::OperationFailed("test double lock poisoned".to_string())
}

/// Preference files kept in a shared map.
#[derive(Clone, Default)]
pub struct MemoryPreferenceStore {
    files: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
    fail_commits: Arc<Mutex<bool>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `commit` fail until reset.
    pub fn set_fail_commits(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_commits.lock() {
            *flag = fail;
        }
    }

    /// Raw snapshot of a file, as the host would see it on disk.
    pub fn raw(&self, file: &str) -> HashMap<String, String> {
        self.files
            .lock()
            .map(|files| files.get(file).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Overwrite a raw file, bypassing any encryption layered on top.
    pub fn put_raw(&self, file: &str, entries: HashMap<String, String>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(file.to_string(), entries);
        }
    }

    pub fn file_exists(&self, file: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(file))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self, file: &str) -> Result<HashMap<String, String>> {
        Ok(self.raw(file))
    }

    async fn commit(&self, file: &str, entries: &HashMap<String, String>) -> Result<()> {
        if *self.fail_commits.lock().map_err(|_| poisoned())? {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.files
            .lock()
            .map_err(|_| poisoned())?
            .insert(file.to_string(), entries.clone());
        Ok(())
    }

    async fn delete_file(&self, file: &str) -> Result<()> {
        self.files.lock().map_err(|_| poisoned())?.remove(file);
        Ok(())
    }
}

/// Key store whose entries can be marked as failing integrity checks.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    keys: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    integrity_failures: Arc<Mutex<u32>>,
    deletes: Arc<Mutex<u32>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` loads report `KeyIntegrity` regardless of contents.
    pub fn fail_integrity(&self, count: u32) {
        if let Ok(mut failures) = self.integrity_failures.lock() {
            *failures = count;
        }
    }

    /// Replace the stored key material with garbage of the same length.
    pub fn scramble(&self, alias: &str) {
        if let Ok(mut keys) = self.keys.lock() {
            if let Some(key) = keys.get_mut(alias) {
                for byte in key.iter_mut() {
                    *byte = !*byte;
                }
            }
        }
    }

    pub fn key(&self, alias: &str) -> Option<Vec<u8>> {
        self.keys.lock().ok().and_then(|keys| keys.get(alias).cloned())
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.lock().map(|d| *d).unwrap_or(0)
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load_key(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        {
            let mut failures = self.integrity_failures.lock().map_err(|_| poisoned())?;
            if *failures > 0 {
                *failures -= 1;
                return Err(BridgeError::KeyIntegrity(
                    "Signature/MAC verification failed".to_string(),
                ));
            }
        }
        Ok(self.key(alias))
    }

    async fn store_key(&self, alias: &str, key: &[u8]) -> Result<()> {
        self.keys
            .lock()
            .map_err(|_| poisoned())?
            .insert(alias.to_string(), key.to_vec());
        Ok(())
    }

    async fn delete_key(&self, alias: &str) -> Result<()> {
        self.keys.lock().map_err(|_| poisoned())?.remove(alias);
        *self.deletes.lock().map_err(|_| poisoned())? += 1;
        Ok(())
    }
}

/// Scripted reply for [`ScriptedHttpClient`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond { status: u16, body: String },
    Fail(String),
    Timeout,
}

impl ScriptedReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        ScriptedReply::Respond {
            status,
            body: body.to_string(),
        }
    }
}

/// HTTP client answering from per-route queues and recording every request.
///
/// Routes are keyed by method and URL path suffix. A route whose queue is
/// empty yields a 404.
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
    routes: Arc<Mutex<Vec<(HttpMethod, String, VecDeque<ScriptedReply>)>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: HttpMethod, path_suffix: &str, reply: ScriptedReply) -> &Self {
        if let Ok(mut routes) = self.routes.lock() {
            match routes
                .iter_mut()
                .find(|(m, p, _)| *m == method && p == path_suffix)
            {
                Some((_, _, queue)) => queue.push_back(reply),
                None => routes.push((method, path_suffix.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_to(&self, path_suffix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| path_of(&r.url).ends_with(path_suffix))
            .collect()
    }
}

fn path_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .map_err(|_| poisoned())?
            .push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().map_err(|_| poisoned())?;
            routes
                .iter_mut()
                .find(|(m, p, _)| *m == request.method && path_of(&request.url).ends_with(p.as_str()))
                .and_then(|(_, _, queue)| queue.pop_front())
        };

        match reply {
            Some(ScriptedReply::Respond { status, body }) => Ok(HttpResponse::new(status, body)),
            Some(ScriptedReply::Fail(message)) => Err(BridgeError::OperationFailed(message)),
            Some(ScriptedReply::Timeout) => Err(BridgeError::Timeout(request.url)),
            None => Ok(HttpResponse::new(404, "")),
        }
    }
}

/// Surface that replays queued outcomes and records what it was asked to render.
#[derive(Clone, Default)]
pub struct ScriptedSurface {
    outcomes: Arc<Mutex<VecDeque<NavigationOutcome>>>,
    rendered: Arc<Mutex<Vec<RenderRequest>>>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: NavigationOutcome) -> &Self {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
        self
    }

    pub fn rendered(&self) -> Vec<RenderRequest> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuthSurface for ScriptedSurface {
    async fn render(&self, request: RenderRequest) -> Result<NavigationOutcome> {
        self.rendered
            .lock()
            .map_err(|_| poisoned())?
            .push(request);
        let next = self.outcomes.lock().map_err(|_| poisoned())?.pop_front();
        Ok(next.unwrap_or(NavigationOutcome::Closed))
    }
}
