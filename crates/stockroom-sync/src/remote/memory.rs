//! In-memory remote store.
//!
//! Authoritative copy of every record, held in a map. Used by tests and by
//! the agent when no remote URL is configured. Failures can be scripted per
//! call or per entity id.
//!
//! Writes follow the same last-writer-wins rule as the local cache: a
//! create or update whose `last_modified` is not newer than the stored copy
//! leaves it in place, and the call returns the stored copy.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use stockroom_core::{timestamp_now, Entity, EntityKind};
use tokio::sync::mpsc;
use tracing::debug;

use super::{RemoteAdapter, RemoteChange, RemoteResult, Subscription};
use crate::error::RemoteError;

const SUBSCRIPTION_BUFFER: usize = 64;

/// Calls received so far, failed ones included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: u32,
    pub update: u32,
    pub archive: u32,
    pub fetch_all: u32,
}

impl CallCounts {
    /// Calls that push a local change (create, update, archive).
    pub fn writes(&self) -> u32 {
        self.create + self.update + self.archive
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<(EntityKind, String), Entity>,
    fail_next: u32,
    fail_always: HashSet<String>,
    rejected: HashSet<String>,
    calls: CallCounts,
}

impl RemoteState {
    /// Applies scripted failures for a call touching `id`.
    fn check(&mut self, id: Option<&str>) -> RemoteResult<()> {
        if let Some(id) = id {
            if self.rejected.contains(id) {
                return Err(RemoteError::Rejected {
                    status: 422,
                    message: format!("record {id} rejected"),
                });
            }
            if self.fail_always.contains(id) {
                return Err(RemoteError::Unavailable(format!("record {id} unreachable")));
            }
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(RemoteError::Unavailable("scripted failure".into()));
        }
        Ok(())
    }

    fn store(&mut self, entity: Entity) -> Entity {
        let key = (entity.kind(), entity.id().to_string());
        if let Some(stored) = self.records.get(&key) {
            if !entity.supersedes(stored) {
                debug!(
                    kind = %entity.kind(),
                    id = %entity.id(),
                    incoming = entity.last_modified(),
                    stored = stored.last_modified(),
                    "Stale write, remote copy kept"
                );
                return stored.clone();
            }
        }
        self.records.insert(key, entity.clone());
        entity
    }
}

/// Remote store kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    subscribers: Mutex<Vec<mpsc::Sender<RemoteChange>>>,
    push_enabled: bool,
    latency: Option<Duration>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            state: Mutex::new(RemoteState::default()),
            subscribers: Mutex::new(Vec::new()),
            push_enabled: true,
            latency: None,
        }
    }

    /// A remote that offers no push subscription, so the engine polls.
    pub fn without_push() -> Self {
        InMemoryRemote {
            push_enabled: false,
            ..Self::new()
        }
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    // =========================================================================
    // Remote-side data
    // =========================================================================

    /// Stores `entity` as-is, without notifying subscribers.
    pub fn seed(&self, entity: Entity) {
        self.lock_state()
            .records
            .insert((entity.kind(), entity.id().to_string()), entity);
    }

    /// Stores `entities` as a change made by another device and pushes it to
    /// subscribers.
    pub fn push_change(&self, kind: EntityKind, entities: Vec<Entity>) {
        {
            let mut state = self.lock_state();
            for entity in &entities {
                state
                    .records
                    .insert((entity.kind(), entity.id().to_string()), entity.clone());
            }
        }

        let change = RemoteChange { kind, entities };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(change.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%kind, "Subscriber lagging, change dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        self.lock_state().records.get(&(kind, id.to_string())).cloned()
    }

    pub fn records(&self, kind: EntityKind) -> Vec<Entity> {
        self.lock_state()
            .records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    // =========================================================================
    // Scripted failures
    // =========================================================================

    /// The next `n` calls fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.lock_state().fail_next = n;
    }

    /// Every call touching `id` fails with `Unavailable`.
    pub fn fail_always_for(&self, id: impl Into<String>) {
        self.lock_state().fail_always.insert(id.into());
    }

    /// Every call touching `id` is rejected (HTTP 422).
    pub fn reject(&self, id: impl Into<String>) {
        self.lock_state().rejected.insert(id.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock_state();
        state.fail_next = 0;
        state.fail_always.clear();
        state.rejected.clear();
    }

    pub fn calls(&self) -> CallCounts {
        self.lock_state().calls
    }

    fn lock_state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteAdapter for InMemoryRemote {
    async fn create(&self, entity: &Entity) -> RemoteResult<Entity> {
        self.simulate_latency().await;
        let mut state = self.lock_state();
        state.calls.create += 1;
        state.check(Some(entity.id()))?;
        Ok(state.store(entity.clone()))
    }

    async fn update(&self, id: &str, entity: &Entity) -> RemoteResult<Entity> {
        self.simulate_latency().await;
        let mut state = self.lock_state();
        state.calls.update += 1;
        state.check(Some(id))?;
        if entity.id() != id {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("path id {id} does not match body id {}", entity.id()),
            });
        }
        Ok(state.store(entity.clone()))
    }

    async fn archive(&self, kind: EntityKind, id: &str) -> RemoteResult<()> {
        self.simulate_latency().await;
        let mut state = self.lock_state();
        state.calls.archive += 1;
        state.check(Some(id))?;

        let Some(existing) = state.records.get(&(kind, id.to_string())).cloned() else {
            return Err(RemoteError::Rejected {
                status: 404,
                message: format!("{kind} {id} not found"),
            });
        };

        let mut archived = existing;
        let at = timestamp_now().max(archived.last_modified());
        archived.soft_delete(at);
        state.records.insert((kind, id.to_string()), archived);
        Ok(())
    }

    async fn fetch_all(&self, kind: EntityKind) -> RemoteResult<Vec<Entity>> {
        self.simulate_latency().await;
        {
            let mut state = self.lock_state();
            state.calls.fetch_all += 1;
            state.check(None)?;
        }
        Ok(self.records(kind))
    }

    fn subscribe(&self) -> Option<Subscription> {
        if !self.push_enabled {
            return None;
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Some(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::{CheckoutLog, Item};

    #[tokio::test]
    async fn test_create_keeps_client_timestamp() {
        let remote = InMemoryRemote::new();
        let item: Entity = Item::new("Drill", 90).into();

        let confirmed = remote.create(&item).await.unwrap();
        assert_eq!(confirmed, item);
        assert_eq!(remote.get(EntityKind::Item, item.id()), Some(confirmed));
        assert_eq!(remote.calls().create, 1);
    }

    #[tokio::test]
    async fn test_stale_write_returns_stored_copy() {
        let remote = InMemoryRemote::new();
        let newer = Item::new("Saw (sharpened)", 200);
        remote.seed(newer.clone().into());

        let older: Entity = Item {
            name: "Saw".into(),
            last_modified: 150,
            ..newer.clone()
        }
        .into();
        let confirmed = remote.update(older.id(), &older).await.unwrap();
        assert_eq!(confirmed, newer.clone().into());

        // Ties keep the stored copy too.
        let same_time: Entity = Item {
            name: "Saw (tie)".into(),
            ..newer.clone()
        }
        .into();
        assert_eq!(remote.create(&same_time).await.unwrap(), newer.clone().into());
        assert_eq!(remote.get(EntityKind::Item, &newer.id), Some(newer.into()));
    }

    #[tokio::test]
    async fn test_archive_checks_in_open_log() {
        let remote = InMemoryRemote::new();
        let log = CheckoutLog::open("item-1", "staff-1", 100);
        remote.seed(log.clone().into());

        remote.archive(EntityKind::CheckoutLog, &log.id).await.unwrap();
        let stored = remote.get(EntityKind::CheckoutLog, &log.id).unwrap();
        assert!(!stored.as_checkout_log().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_archive_unknown_record_is_rejected() {
        let remote = InMemoryRemote::new();
        let err = remote.archive(EntityKind::Staff, "missing").await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let remote = InMemoryRemote::new();
        let item: Entity = Item::new("Ladder", 1).into();

        remote.fail_next(1);
        assert!(matches!(remote.create(&item).await, Err(RemoteError::Unavailable(_))));
        assert!(remote.create(&item).await.is_ok());

        remote.reject(item.id());
        assert!(remote.update(item.id(), &item).await.unwrap_err().is_permanent());

        remote.clear_failures();
        remote.fail_always_for(item.id());
        assert!(remote.update(item.id(), &item).await.unwrap_err().is_transient());
        assert_eq!(remote.calls().writes(), 4);
    }

    #[tokio::test]
    async fn test_push_reaches_subscribers() {
        let remote = InMemoryRemote::new();
        let mut subscription = remote.subscribe().unwrap();
        let item: Entity = Item::new("Cable", 5).into();

        remote.push_change(EntityKind::Item, vec![item.clone()]);
        let change = subscription.next().await.unwrap();
        assert_eq!(change.kind, EntityKind::Item);
        assert_eq!(change.entities, vec![item]);

        assert!(InMemoryRemote::without_push().subscribe().is_none());
    }
}
