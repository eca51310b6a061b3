//! Registry of live build sessions.
//!
//! The store owns each session's handle, its cancel function and its
//! creation time, and evicts sessions on a timer. It never mutates a session;
//! only the orchestrator bound to a session writes to it.

use crate::errors::{BuildError, BuildResult};
use nugget_common::{BuildSession, SessionState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared, read-mostly view of one session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    inner: Arc<RwLock<BuildSession>>,
}

impl SessionHandle {
    pub fn new(session: BuildSession) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    pub fn id(&self) -> String {
        self.inner.read().id.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Copy of the session as it is right now.
    pub fn snapshot(&self) -> BuildSession {
        self.inner.read().clone()
    }

    /// Mutate the session. Reserved for the orchestrator bound to it.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut BuildSession) -> R) -> R {
        f(&mut self.inner.write())
    }
}

pub type CancelFn = Box<dyn FnOnce() + Send>;
pub type CleanupHook = Arc<dyn Fn(&str) + Send + Sync>;

struct StoreEntry {
    session: SessionHandle,
    /// Taken (and so cleared) the first time it fires
    cancel_fn: Option<CancelFn>,
    created_at: Instant,
    cleanup: Option<JoinHandle<()>>,
}

impl StoreEntry {
    fn view(&self) -> SessionEntry {
        SessionEntry {
            session: self.session.clone(),
            created_at: self.created_at,
            has_cancel_fn: self.cancel_fn.is_some(),
        }
    }

    fn abort_cleanup(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

/// Read-only view of a store entry.
#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub session: SessionHandle,
    pub created_at: Instant,
    pub has_cancel_fn: bool,
}

type Entries = Mutex<HashMap<String, StoreEntry>>;

#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<Entries>,
    on_cleanup: Option<CleanupHook>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            on_cleanup: None,
        }
    }

    /// Hook invoked with the session id whenever a timer or prune evicts it.
    pub fn with_cleanup_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_cleanup = Some(Arc::new(hook));
        self
    }

    /// Register a session. An existing entry under the same id is replaced.
    pub fn create(&self, id: &str, session: BuildSession) -> SessionEntry {
        let entry = StoreEntry {
            session: SessionHandle::new(session),
            cancel_fn: None,
            created_at: Instant::now(),
            cleanup: None,
        };
        let view = entry.view();

        if let Some(mut previous) = self.entries.lock().insert(id.to_string(), entry) {
            warn!(session_id = id, "Replacing existing session entry");
            previous.abort_cleanup();
        }
        debug!(session_id = id, "Session registered");
        view
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.entries.lock().get(id).map(StoreEntry::view)
    }

    pub fn get_or_throw(&self, id: &str) -> BuildResult<SessionEntry> {
        self.get(id)
            .ok_or_else(|| BuildError::not_found("session", id))
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered session ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Attach the function that cancels the session's in-flight work.
    pub fn set_cancel_fn(&self, id: &str, cancel: impl FnOnce() + Send + 'static) -> BuildResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| BuildError::not_found("session", id))?;
        entry.cancel_fn = Some(Box::new(cancel));
        Ok(())
    }

    /// Fire one session's cancel function. Returns whether it fired.
    pub fn cancel(&self, id: &str) -> bool {
        let cancel = self
            .entries
            .lock()
            .get_mut(id)
            .and_then(|e| e.cancel_fn.take());
        match cancel {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    /// Remove a session without firing the cleanup hook.
    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        let mut entry = self.entries.lock().remove(id)?;
        entry.abort_cleanup();
        Some(entry.session)
    }

    /// Evict the session after `delay`, then call the cleanup hook once.
    ///
    /// Rescheduling replaces the earlier timer. Must be called from within a
    /// tokio runtime.
    pub fn schedule_cleanup(&self, id: &str, delay: Duration) -> BuildResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("schedule_cleanup needs a tokio runtime: {}", e))?;

        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| BuildError::not_found("session", id))?;
        entry.abort_cleanup();

        // Weak so a pending timer never keeps the registry alive
        let weak: Weak<Entries> = Arc::downgrade(&self.entries);
        let hook = self.on_cleanup.clone();
        let session_id = id.to_string();
        entry.cleanup = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(entries) = weak.upgrade() else {
                return;
            };
            let removed = entries.lock().remove(&session_id);
            if removed.is_some() {
                info!(session_id = %session_id, "Session cleaned up");
                if let Some(hook) = hook {
                    hook(&session_id);
                }
            }
        }));
        debug!(session_id = id, delay_ms = delay.as_millis() as u64, "Cleanup scheduled");
        Ok(())
    }

    /// Remove every session older than `max_age`. Returns the removed ids, sorted.
    pub fn prune_stale(&self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut removed = {
            let mut entries = self.entries.lock();
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.created_at) > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                if let Some(mut entry) = entries.remove(id) {
                    entry.abort_cleanup();
                }
            }
            stale
        };
        removed.sort();

        if !removed.is_empty() {
            info!(count = removed.len(), "Pruned stale sessions");
        }
        if let Some(hook) = &self.on_cleanup {
            for id in &removed {
                hook(id);
            }
        }
        removed
    }

    /// Periodically prune sessions older than `max_age`.
    ///
    /// The task ends on its own once the store is dropped; abort the handle to
    /// stop it earlier.
    pub fn spawn_pruner(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.entries);
        let hook = self.on_cleanup.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                let store = SessionStore {
                    entries,
                    on_cleanup: hook.clone(),
                };
                store.prune_stale(max_age);
            }
        })
    }

    /// Fire every registered cancel function, each at most once overall.
    /// Returns how many fired.
    pub fn cancel_all(&self) -> usize {
        let cancels: Vec<CancelFn> = self
            .entries
            .lock()
            .values_mut()
            .filter_map(|e| e.cancel_fn.take())
            .collect();

        let fired = cancels.len();
        for cancel in cancels {
            cancel();
        }
        if fired > 0 {
            info!(count = fired, "Cancelled sessions");
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_store() -> (SessionStore, Arc<Mutex<Vec<String>>>) {
        let cleaned = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&cleaned);
        let store = SessionStore::new().with_cleanup_hook(move |id| sink.lock().push(id.to_string()));
        (store, cleaned)
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let entry = store.create("s1", BuildSession::new("s1"));
        assert!(!entry.has_cancel_fn);
        assert_eq!(entry.session.state(), SessionState::Idle);

        assert!(store.has("s1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s1").unwrap().session.id(), "s1");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_get_or_throw_not_found() {
        let store = SessionStore::new();
        let err = store.get_or_throw("nope").unwrap_err();
        assert!(matches!(err, BuildError::NotFound { kind: "session", .. }));
    }

    #[test]
    fn test_handles_share_state() {
        let store = SessionStore::new();
        let entry = store.create("s1", BuildSession::new("s1"));
        entry.session.update(|s| s.state = SessionState::Executing);
        assert_eq!(store.get("s1").unwrap().session.state(), SessionState::Executing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_cleanup_removes_after_delay() {
        let (store, cleaned) = recording_store();
        store.create("s1", BuildSession::new("s1"));
        store.schedule_cleanup("s1", Duration::from_millis(50)).unwrap();
        assert!(store.has("s1"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.has("s1"));
        assert_eq!(*cleaned.lock(), vec!["s1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduled_cleanup_replaces_timer() {
        let (store, cleaned) = recording_store();
        store.create("s1", BuildSession::new("s1"));
        store.schedule_cleanup("s1", Duration::from_millis(50)).unwrap();
        store.schedule_cleanup("s1", Duration::from_millis(500)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.has("s1"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!store.has("s1"));
        assert_eq!(cleaned.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_cleanup() {
        let (store, cleaned) = recording_store();
        store.create("s1", BuildSession::new("s1"));
        store.schedule_cleanup("s1", Duration::from_millis(50)).unwrap();
        assert!(store.remove("s1").is_some());

        store.create("s1", BuildSession::new("s1"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.has("s1"));
        assert!(cleaned.lock().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_cleanup_unknown_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.schedule_cleanup("ghost", Duration::from_millis(1)),
            Err(BuildError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_stale() {
        let (store, cleaned) = recording_store();
        store.create("old-a", BuildSession::new("old-a"));
        store.create("old-b", BuildSession::new("old-b"));
        tokio::time::advance(Duration::from_secs(120)).await;
        store.create("young", BuildSession::new("young"));

        let removed = store.prune_stale(Duration::from_secs(60));
        assert_eq!(removed, vec!["old-a", "old-b"]);
        assert_eq!(store.ids(), vec!["young"]);
        assert_eq!(cleaned.lock().len(), 2);

        assert!(store.prune_stale(Duration::from_secs(60)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruner_sweeps_periodically() {
        let (store, cleaned) = recording_store();
        store.create("s1", BuildSession::new("s1"));
        let pruner = store.spawn_pruner(Duration::from_secs(10), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.has("s1"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!store.has("s1"));
        assert_eq!(*cleaned.lock(), vec!["s1".to_string()]);
        pruner.abort();
    }

    #[test]
    fn test_cancel_all_fires_each_once() {
        let store = SessionStore::new();
        let counts: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for (i, count) in counts.iter().enumerate() {
            let id = format!("s{}", i);
            store.create(&id, BuildSession::new(&id));
            let count = Arc::clone(count);
            store
                .set_cancel_fn(&id, move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        store.create("no-cancel", BuildSession::new("no-cancel"));

        assert_eq!(store.cancel_all(), 3);
        assert_eq!(store.cancel_all(), 0);
        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
        assert!(!store.get("s0").unwrap().has_cancel_fn);
    }

    #[test]
    fn test_single_cancel_is_single_fire() {
        let store = SessionStore::new();
        store.create("s1", BuildSession::new("s1"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        store
            .set_cancel_fn("s1", move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(store.cancel("s1"));
        assert!(!store.cancel("s1"));
        assert_eq!(store.cancel_all(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_cancel_fn_unknown_session() {
        let store = SessionStore::new();
        assert!(store.set_cancel_fn("ghost", || {}).is_err());
    }
}
