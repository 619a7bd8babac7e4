//! Per-journey mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use xavyo_core::CorrelationId;

type LockMap = DashMap<CorrelationId, Arc<Mutex<()>>>;

/// Async mutexes keyed by correlation id.
///
/// Holding a [`JourneyGuard`] makes one resume-process-persist cycle
/// exclusive for that journey. Journeys never share a lock. An entry lives
/// only while a guard holds it or a task waits for it.
#[derive(Debug, Clone, Default)]
pub struct JourneyLocks {
    inner: Arc<LockMap>,
}

/// Exclusive access to one journey until dropped.
pub struct JourneyGuard {
    correlation_id: CorrelationId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl JourneyGuard {
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl Drop for JourneyGuard {
    fn drop(&mut self) {
        // Unlock first so the map holds the last reference unless a waiter
        // cloned the mutex.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.correlation_id, |_, m| Arc::strong_count(m) == 1);
    }
}

impl std::fmt::Debug for JourneyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyGuard")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl JourneyLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, correlation_id: CorrelationId) -> JourneyGuard {
        // Clone the mutex out so no map shard stays locked across the await.
        let mutex = self.inner.entry(correlation_id).or_default().clone();
        JourneyGuard {
            correlation_id,
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Drops every entry nobody holds or waits for.
    pub fn prune(&self) {
        self.inner.retain(|_, m| Arc::strong_count(m) > 1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
