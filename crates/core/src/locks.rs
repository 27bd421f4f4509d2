use ctmark_uuid::ResearchId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<ResearchId, Arc<AsyncMutex<()>>>>;

/// Per-research write locks.
///
/// Writers of the same research queue behind one async mutex; different researches never block
/// each other. Entries are created on first use and removed when the last guard or waiter for
/// that research goes away, including when the holding future is dropped.
#[derive(Debug, Default)]
pub struct ResearchLocks {
    locks: Arc<LockMap>,
}

/// Exclusive write access to one research. Releases the lock on drop.
#[derive(Debug)]
pub struct ResearchLockGuard {
    locks: Arc<LockMap>,
    id: ResearchId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ResearchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive write access to `id`.
    pub async fn lock(&self, id: &ResearchId) -> ResearchLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        ResearchLockGuard {
            locks: Arc::clone(&self.locks),
            id: id.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ResearchLockGuard {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining reference when nobody waits.
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}
