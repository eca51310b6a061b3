//! Keyed wait points resolved from outside the orchestrator.
//!
//! A phase that needs human input opens a wait under a key (`review`,
//! `help:<task>`, `flash:<device>`, a task id for questions) and suspends on
//! it. An inbound command resolves the key with a value. Each key owns its own
//! oneshot channel, so concurrent waits never interfere.

use crate::errors::{BuildError, BuildResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Human answer to a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

impl GateDecision {
    pub fn reject(feedback: impl Into<String>) -> Self {
        GateDecision::Rejected {
            feedback: Some(feedback.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, GateDecision::Approved)
    }

    /// Feedback text attached to a rejection, if any.
    pub fn feedback(&self) -> Option<&str> {
        match self {
            GateDecision::Rejected { feedback } => feedback.as_deref(),
            GateDecision::Approved => None,
        }
    }
}

struct Slot<T> {
    /// Distinguishes a reopened key from the wait that owned it before
    generation: u64,
    tx: oneshot::Sender<T>,
}

/// Registry of pending waits keyed by id.
pub struct WaitRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
    kind: &'static str,
}

struct RegistryInner<T> {
    pending: HashMap<String, Slot<T>>,
    next_generation: u64,
}

impl<T> Clone for WaitRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            kind: self.kind,
        }
    }
}

impl<T> std::fmt::Debug for WaitRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.inner.lock().pending.keys().cloned().collect();
        keys.sort();
        f.debug_struct("WaitRegistry")
            .field("kind", &self.kind)
            .field("pending", &keys)
            .finish()
    }
}

pub type GateRegistry = WaitRegistry<GateDecision>;
pub type QuestionRegistry = WaitRegistry<serde_json::Value>;

impl GateRegistry {
    pub fn gates() -> Self {
        Self::new("gate")
    }
}

impl QuestionRegistry {
    pub fn questions() -> Self {
        Self::new("question")
    }
}

impl<T: Send + 'static> WaitRegistry<T> {
    /// `kind` names the wait in `NotFound` errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                pending: HashMap::new(),
                next_generation: 0,
            })),
            kind,
        }
    }

    /// Open a wait under `key`. Reopening a key supersedes the earlier wait,
    /// which then observes cancellation.
    pub fn open(&self, key: &str) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner
            .pending
            .insert(key.to_string(), Slot { generation, tx });
        debug!(kind = self.kind, key, "Wait opened");

        Waiter {
            key: key.to_string(),
            generation,
            rx,
            registry: self.clone(),
        }
    }

    /// Deliver `value` to the wait registered under `key`.
    pub fn resolve(&self, key: &str, value: T) -> BuildResult<()> {
        let slot = self
            .inner
            .lock()
            .pending
            .remove(key)
            .ok_or_else(|| BuildError::not_found(self.kind, key))?;

        // The waiter may have been dropped between lookup and send
        slot.tx
            .send(value)
            .map_err(|_| BuildError::not_found(self.kind, key))?;
        debug!(kind = self.kind, key, "Wait resolved");
        Ok(())
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.lock().pending.contains_key(key)
    }

    /// Keys currently waiting, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().pending.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every pending wait; their waiters observe cancellation.
    pub fn clear(&self) {
        self.inner.lock().pending.clear();
    }

    fn forget(&self, key: &str, generation: u64) {
        let mut inner = self.inner.lock();
        if inner
            .pending
            .get(key)
            .is_some_and(|slot| slot.generation == generation)
        {
            inner.pending.remove(key);
        }
    }
}

/// One suspended wait. Dropping it withdraws the key.
pub struct Waiter<T: Send + 'static> {
    key: String,
    generation: u64,
    rx: oneshot::Receiver<T>,
    registry: WaitRegistry<T>,
}

impl<T: Send + 'static> Waiter<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Suspend until resolved or cancelled.
    ///
    /// A superseded or cleared wait reports `Cancelled`.
    pub async fn wait(mut self, cancel: &CancellationToken) -> BuildResult<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
            value = &mut self.rx => value.map_err(|_| BuildError::Cancelled),
        }
    }
}

impl<T: Send + 'static> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.registry.forget(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let gates = GateRegistry::gates();
        let waiter = gates.open("review");
        assert!(gates.is_pending("review"));

        let resolver = gates.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.resolve("review", GateDecision::Approved).unwrap();
        });

        let decision = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert!(decision.is_approved());
        assert!(!gates.is_pending("review"));
    }

    #[tokio::test]
    async fn test_keys_do_not_interfere() {
        let gates = GateRegistry::gates();
        let a = gates.open("flash:a");
        let b = gates.open("flash:b");
        assert_eq!(gates.pending(), vec!["flash:a", "flash:b"]);

        gates.resolve("flash:b", GateDecision::reject("no cable")).unwrap();
        gates.resolve("flash:a", GateDecision::Approved).unwrap();

        let cancel = CancellationToken::new();
        assert!(a.wait(&cancel).await.unwrap().is_approved());
        assert_eq!(b.wait(&cancel).await.unwrap().feedback(), Some("no cable"));
    }

    #[test]
    fn test_resolve_unknown_key_is_not_found() {
        let gates = GateRegistry::gates();
        let err = gates.resolve("nope", GateDecision::Approved).unwrap_err();
        assert!(matches!(err, BuildError::NotFound { kind: "gate", .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let gates = GateRegistry::gates();
        let waiter = gates.open("review");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = waiter.wait(&cancel).await;
        assert!(matches!(result, Err(BuildError::Cancelled)));
        assert!(gates.pending().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_supersedes_previous_wait() {
        let gates = GateRegistry::gates();
        let first = gates.open("review");
        let second = gates.open("review");

        let result = first.wait(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BuildError::Cancelled)));
        // Dropping the superseded waiter must not withdraw the new one
        assert!(gates.is_pending("review"));

        gates.resolve("review", GateDecision::Approved).unwrap();
        assert!(second.wait(&CancellationToken::new()).await.unwrap().is_approved());
    }

    #[tokio::test]
    async fn test_clear_releases_waiters() {
        let questions = QuestionRegistry::questions();
        let waiter = questions.open("task-1");
        questions.clear();
        assert!(matches!(
            waiter.wait(&CancellationToken::new()).await,
            Err(BuildError::Cancelled)
        ));
    }

    #[test]
    fn test_decision_serde_shape() {
        let json = serde_json::to_value(GateDecision::reject("fix colors")).unwrap();
        assert_eq!(json["decision"], "rejected");
        assert_eq!(json["feedback"], "fix colors");

        let decision: GateDecision = serde_json::from_str(r#"{"decision": "approved"}"#).unwrap();
        assert!(decision.is_approved());
    }
}
