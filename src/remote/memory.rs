use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{segments, set_value_at, value_at, RemoteError, RemoteStore, SnapshotStream};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    root: Value,
    channels: HashMap<String, broadcast::Sender<Value>>,
    journal: Vec<(String, Value)>,
}

/// In-process real-time store. Clones share the same tree, so two engines
/// built on clones of one `MemoryRemote` behave like two devices on one
/// family.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `RemoteError::Network`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every successful write, in order.
    pub fn journal(&self) -> Vec<(String, Value)> {
        self.lock().journal.clone()
    }

    /// Successful writes addressed to `path`.
    pub fn writes_to(&self, path: &str) -> Vec<Value> {
        self.lock()
            .journal
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Current value at `path` without going through the async API.
    pub fn peek(&self, path: &str) -> Option<Value> {
        let guard = self.lock();
        value_at(&guard.root, &segments(path)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_related(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("simulated write failure".into()));
        }

        let mut guard = self.lock();
        set_value_at(&mut guard.root, &segments(path), value.clone());
        guard.journal.push((path.to_string(), value));

        let mut notified = 0usize;
        let inner = &mut *guard;
        inner.channels.retain(|_, tx| tx.receiver_count() > 0);
        for (subscribed, tx) in &inner.channels {
            if is_related(subscribed, path) {
                let current = value_at(&inner.root, &segments(subscribed))
                    .cloned()
                    .unwrap_or(Value::Null);
                let _ = tx.send(current);
                notified += 1;
            }
        }
        debug!(target: "famhealth", event = "memory_remote_write", path, notified);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        Ok(self.peek(path))
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotStream, RemoteError> {
        let (current, rx) = {
            let mut guard = self.lock();
            let rx = guard
                .channels
                .entry(path.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe();
            let current = value_at(&guard.root, &segments(path))
                .cloned()
                .unwrap_or(Value::Null);
            (current, rx)
        };

        let updates = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(value) => return Some((value, rx)),
                    // Every message is a full snapshot, so skipping lagged ones is safe.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::once(async move { current }).chain(updates).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_delivers_current_value_then_updates() {
        let remote = MemoryRemote::new();
        remote
            .write("families/AB12CD/members", json!({ "m1": { "name": "Alex" } }))
            .await
            .unwrap();

        let mut stream = remote.subscribe("families/AB12CD/members").await.unwrap();
        assert_eq!(stream.next().await, Some(json!({ "m1": { "name": "Alex" } })));

        remote
            .write("families/AB12CD/members", json!({ "m2": { "name": "Sam" } }))
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(json!({ "m2": { "name": "Sam" } })));
    }

    #[tokio::test]
    async fn empty_path_delivers_null() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe("families/NOPE00/entries").await.unwrap();
        assert_eq!(stream.next().await, Some(Value::Null));
    }

    #[tokio::test]
    async fn ancestor_write_notifies_descendant_subscribers() {
        let remote = MemoryRemote::new();
        let mut stream = remote.subscribe("families/AB12CD/allergies").await.unwrap();
        assert_eq!(stream.next().await, Some(Value::Null));

        remote
            .write(
                "families/AB12CD",
                json!({ "createdAt": "2024-01-01T00:00:00.000Z", "allergies": { "m1": [] } }),
            )
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(json!({ "m1": [] })));
    }

    #[tokio::test]
    async fn unrelated_paths_are_not_notified() {
        assert!(is_related("families/A", "families/A/members"));
        assert!(is_related("families/A/members", "families/A"));
        assert!(!is_related("families/A/members", "families/A/entries"));
        assert!(!is_related("families/A/members", "families/B/members"));
    }

    #[tokio::test]
    async fn failed_writes_are_not_journaled() {
        let remote = MemoryRemote::new();
        remote.fail_writes(true);
        let err = remote
            .write("families/AB12CD/members", json!({}))
            .await
            .expect_err("write should fail");
        assert!(matches!(err, RemoteError::Network(_)));
        assert!(remote.journal().is_empty());
    }
}
