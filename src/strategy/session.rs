//! Lazily created per-session state guarded by per-session locks

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrent map from session id to that session's state.
///
/// Each session gets its own async mutex, so operations on one session are
/// serialised while different sessions proceed independently. The map guard
/// is released before the session lock is awaited.
#[derive(Debug)]
pub struct SessionMap<S> {
    sessions: DashMap<String, Arc<Mutex<S>>>,
}

impl<S> Default for SessionMap<S> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<S: Default> SessionMap<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// State handle for the session, created empty on first access
    pub fn entry(&self, session_id: &str) -> Arc<Mutex<S>> {
        if let Some(existing) = self.sessions.get(session_id) {
            return existing.value().clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(S::default())))
            .value()
            .clone()
    }

    /// State handle if the session has been seen
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<S>>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Empty the session's state in place, under its lock.
    ///
    /// The entry stays in the map, so an operation already waiting on the
    /// handle runs against the emptied state instead of a detached copy.
    pub async fn reset(&self, session_id: &str) {
        if let Some(session) = self.get(session_id) {
            *session.lock().await = S::default();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Per-session lock with no state of its own, for strategies whose state
/// lives in an external store
pub type SessionLocks = SessionMap<()>;
