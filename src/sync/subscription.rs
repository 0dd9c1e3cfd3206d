use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;
use tracing::debug;

use super::EngineInner;

struct HandleInner {
    engine: Weak<EngineInner>,
    epoch: u64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Teardown for one family subscription (one listener per collection).
///
/// `unsubscribe` is idempotent. Once it returns, snapshots still in flight
/// for this subscription are discarded instead of applied.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub(super) fn new(engine: Weak<EngineInner>, epoch: u64, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                engine,
                epoch,
                tasks: Mutex::new(tasks),
            }),
        }
    }

    pub fn unsubscribe(&self) {
        let tasks = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }

        // Retire the epoch first so a listener that is mid-delivery finds it stale.
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.retire_epoch(self.inner.epoch);
        }
        let count = tasks.len();
        for task in tasks {
            task.abort();
        }
        debug!(
            target: "famhealth",
            event = "subscription_torn_down",
            epoch = self.inner.epoch,
            listeners = count
        );
    }

    pub fn is_active(&self) -> bool {
        !self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub(super) fn epoch(&self) -> u64 {
        self.inner.epoch
    }
}
