//! Per-record-id serialization for engine operations

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::RecordId;

/// Async lock map keyed by record id.
///
/// Operations against the same id queue up in arrival order; different ids
/// proceed independently. Entries are tiny and live for the engine's
/// lifetime, so they are never evicted.
#[derive(Default)]
pub struct IdLocks {
    inner: Mutex<HashMap<RecordId, Arc<AsyncMutex<()>>>>,
}

impl IdLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: RecordId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn same_id_operations_queue_up() {
        let locks = Arc::new(IdLocks::new());
        let id = RecordId::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.acquire(id).await;

        let waiting = {
            let locks = Arc::clone(&locks);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                log.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.lock().unwrap().push("first");
        drop(guard);

        waiting.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn different_ids_do_not_block() {
        let locks = IdLocks::new();
        let _held = locks.acquire(RecordId::new()).await;

        // completes immediately because the ids differ
        let _other = locks.acquire(RecordId::new()).await;
    }
}
