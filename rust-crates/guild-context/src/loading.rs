//! Aggregation of independent "still loading" signals.
//!
//! Keys are independent booleans, not reference counts: two owners sharing a
//! key must coordinate between themselves, and a `stop_loading` without a
//! matching start simply leaves the key cleared.
use chrono::{
    DateTime,
    Utc,
};
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadingKey(Cow<'static, str>);

impl LoadingKey {
    pub const AUTH: LoadingKey = LoadingKey(Cow::Borrowed("auth"));
    pub const GUILD_LIST: LoadingKey = LoadingKey(Cow::Borrowed("guild-list"));
    pub const HEARTBEAT: LoadingKey = LoadingKey(Cow::Borrowed("heartbeat"));
    pub const GUILD_SWITCH: LoadingKey = LoadingKey(Cow::Borrowed("guild-switch"));
    pub const PROFILE_SYNC: LoadingKey = LoadingKey(Cow::Borrowed("profile-sync"));

    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    /// Key used while a cached query family is being refetched.
    pub fn query(family: &str) -> Self {
        Self::new(format!("query:{family}"))
    }

    /// Dependencies the page shell waits on before the first paint.
    pub fn shell_keys() -> Vec<LoadingKey> {
        vec![
            Self::AUTH,
            Self::GUILD_LIST,
            Self::HEARTBEAT,
            Self::GUILD_SWITCH,
        ]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadingError {
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for LoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Default)]
struct LoadingState {
    loading: HashMap<LoadingKey, bool>,
    errors: HashMap<LoadingKey, LoadingError>,
}

/// Process-wide loading registry. Cloning shares the same state.
///
/// Every change bumps a version on a watch channel so adapters can recompute
/// derived values without polling.
#[derive(Clone)]
pub struct LoadingTracker {
    state: Arc<Mutex<LoadingState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for LoadingTracker {
    fn default() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(LoadingState::default())),
            changes: Arc::new(changes),
        }
    }
}

impl LoadingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn start_loading(&self, key: LoadingKey) {
        self.set_loading(key, true);
    }

    pub fn stop_loading(&self, key: LoadingKey) {
        self.set_loading(key, false);
    }

    pub fn set_loading(&self, key: LoadingKey, loading: bool) {
        let changed = {
            let mut state = self.lock();
            state.loading.insert(key, loading) != Some(loading)
        };
        if changed {
            self.notify();
        }
    }

    pub fn is_loading(&self, key: &LoadingKey) -> bool {
        self.lock().loading.get(key).copied().unwrap_or(false)
    }

    pub fn is_any_loading(&self) -> bool {
        self.lock().loading.values().any(|loading| *loading)
    }

    pub fn is_any_loading_of(&self, keys: &[LoadingKey]) -> bool {
        let state = self.lock();
        keys.iter()
            .any(|key| state.loading.get(key).copied().unwrap_or(false))
    }

    /// Last error recorded for `key`. It stays visible until the next
    /// `with_loading` for the same key starts.
    pub fn error(&self, key: &LoadingKey) -> Option<LoadingError> {
        self.lock().errors.get(key).cloned()
    }

    pub fn set_error(&self, key: LoadingKey, error: impl fmt::Display) {
        let error = LoadingError {
            message: error.to_string(),
            recorded_at: Utc::now(),
        };
        self.lock().errors.insert(key, error);
        self.notify();
    }

    pub fn clear_error(&self, key: &LoadingKey) {
        let removed = self.lock().errors.remove(key).is_some();
        if removed {
            self.notify();
        }
    }

    /// Mark `key` loading until the returned guard is dropped.
    pub fn guard(&self, key: LoadingKey) -> LoadingGuard {
        self.start_loading(key.clone());
        LoadingGuard {
            tracker: self.clone(),
            key,
        }
    }

    /// Run `task` with `key` marked loading.
    ///
    /// The prior error for `key` is cleared up front; a failure is recorded
    /// and handed back to the caller. The key is released on every exit path,
    /// including the returned future being dropped mid-flight.
    pub async fn with_loading<T, F, Fut>(&self, key: LoadingKey, task: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let _guard = self.guard(key.clone());
        self.clear_error(&key);
        let result = task().await;
        if let Err(err) = &result {
            tracing::warn!(%key, "{err:#}");
            self.set_error(key, format!("{err:#}"));
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, LoadingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

pub struct LoadingGuard {
    tracker: LoadingTracker,
    key: LoadingKey,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.tracker.stop_loading(self.key.clone());
    }
}
