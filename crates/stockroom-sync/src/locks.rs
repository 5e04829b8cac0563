//! Per-entity async locks.
//!
//! Every read/decide/write sequence on one record (local mutation, drain
//! write-back, remote ingestion) runs under that record's lock, so the
//! three paths cannot interleave on the same id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stockroom_core::EntityKind;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (EntityKind, String);

#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Held while a record is being read and written.
#[derive(Debug)]
pub struct EntityGuard {
    _guard: OwnedMutexGuard<()>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock on one record.
    pub async fn lock(&self, kind: EntityKind, id: &str) -> EntityGuard {
        let lock = {
            // Never held across an await.
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            if locks.len() > 1024 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry((kind, id.to_string()))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        EntityGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entity_is_exclusive() {
        let locks = Arc::new(EntityLocks::new());
        let guard = locks.lock(EntityKind::Item, "i1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(EntityKind::Item, "i1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _item = locks.lock(EntityKind::Item, "x").await;
        let _staff = locks.lock(EntityKind::Staff, "x").await;
        let _other = locks.lock(EntityKind::Item, "y").await;
        assert_eq!(locks.len(), 3);
    }
}
