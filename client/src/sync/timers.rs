//! Per-item retry timers.
//!
//! At most one timer is armed per queue item. Arming again replaces the
//! previous timer; cancelled timers never fire.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ferry_engine::QueueItemId;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct RetryTimers {
    timers: Arc<DashMap<QueueItemId, (u64, JoinHandle<()>)>>,
    generation: AtomicU64,
}

impl RetryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer armed for `id`.
    pub fn arm<F>(&self, id: QueueItemId, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove_if(&id, |_, (armed, _)| *armed == generation);
            task.await;
        });

        if let Some((_, previous)) = self.timers.insert(id, (generation, handle)) {
            previous.abort();
        }
        tracing::debug!(item_id = id, delay_ms = delay.as_millis() as u64, "Retry timer armed");
    }

    /// Disarm the timer of one item. Returns whether one was armed.
    pub fn cancel(&self, id: QueueItemId) -> bool {
        match self.timers.remove(&id) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Disarm every timer. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<QueueItemId> = self.timers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn is_armed(&self, id: QueueItemId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
