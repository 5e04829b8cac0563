//! # Sync Engine
//!
//! Entry point for the sync core. Owns the local store, the remote adapter
//! and the drain worker, and publishes sync status.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine Architecture                          │
//! │                                                                         │
//! │  callers (UI, agent)                                                    │
//! │    │ get_cached / enqueue_mutation / trigger_sync / ingest_remote       │
//! │    ▼                                                                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                       SyncEngine (Arc<EngineInner>)              │  │
//! │  │                                                                  │  │
//! │  │  EntityLocks ─── serialises mutation / write-back / ingestion    │  │
//! │  │  drain_guard ─── one drain at a time                             │  │
//! │  │  StatusBroadcaster ─── listeners + watch<SyncStatus>             │  │
//! │  └──────┬────────────────────────┬───────────────────────┬─────────┘  │
//! │         ▼                        ▼                       ▼             │
//! │  ┌──────────────┐       ┌────────────────┐      ┌─────────────────┐    │
//! │  │  Database    │       │ RemoteAdapter  │      │ Worker tasks    │    │
//! │  │  entities    │       │ create/update/ │      │ timer, connect- │    │
//! │  │  queue       │       │ archive/fetch  │      │ ivity, pushes   │    │
//! │  │  dead letters│       └────────────────┘      └─────────────────┘    │
//! │  └──────────────┘                                                      │
//! │                                                                         │
//! │  Remote failures never reach mutation callers; they surface only       │
//! │  through SyncStatus and the logs.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex};

use stockroom_core::validation::validate_entity;
use stockroom_core::{
    timestamp_now, DeadLetteredOperation, Entity, EntityKind, OperationType, PendingOperation,
    SyncStatus,
};
use stockroom_db::{Database, PutOutcome};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectivity::ConnectivitySignal;
use crate::drain::{attempt_sync, DrainReport, DrainTrigger};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::listener::{ListenerId, StatusBroadcaster, SyncStatusListener};
use crate::locks::EntityLocks;
use crate::remote::RemoteAdapter;
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::worker::BackgroundTasks;

// =============================================================================
// Ingest Report
// =============================================================================

/// What a batch of remote records did to the local cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    /// Remote record was newer and overwrote the cached one.
    pub replaced: usize,
    /// Cached record was as new or newer and stayed.
    pub kept: usize,
    /// Records of a different kind than the batch.
    pub skipped: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.kept += other.kept;
        self.skipped += other.skipped;
    }

    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct EngineInner {
    pub(crate) db: Database,
    pub(crate) remote: Arc<dyn RemoteAdapter>,
    pub(crate) connectivity: ConnectivitySignal,
    pub(crate) config: SyncConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) locks: EntityLocks,
    pub(crate) status: StatusBroadcaster,
    pub(crate) drain_guard: tokio::sync::Mutex<()>,
    drain_tx: mpsc::Sender<DrainTrigger>,
    drain_rx: Mutex<Option<mpsc::Receiver<DrainTrigger>>>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl EngineInner {
    /// Connected and not configured offline.
    pub(crate) fn is_online(&self) -> bool {
        self.config.is_sync_enabled() && self.connectivity.is_connected()
    }

    /// Asks the worker for a drain. Never blocks; coalesces with a request
    /// already waiting.
    pub(crate) fn request_drain(&self, trigger: DrainTrigger) {
        match self.drain_tx.try_send(trigger) {
            Ok(()) => debug!(%trigger, "Drain requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%trigger, "Drain already requested")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%trigger, "Worker stopped, drain request dropped")
            }
        }
    }
}

/// Offline-first sync engine for items, staff and checkout logs.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates an engine. Nothing runs in the background until [`start`].
    ///
    /// [`start`]: SyncEngine::start
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteAdapter>,
        connectivity: ConnectivitySignal,
        config: SyncConfig,
    ) -> Self {
        let (drain_tx, drain_rx) = mpsc::channel(1);
        let retry = config.retry_policy();

        SyncEngine {
            inner: Arc::new(EngineInner {
                db,
                remote,
                connectivity,
                config,
                retry,
                locks: EntityLocks::new(),
                status: StatusBroadcaster::new(),
                drain_guard: tokio::sync::Mutex::new(()),
                drain_tx,
                drain_rx: Mutex::new(Some(drain_rx)),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.inner.connectivity
    }

    // =========================================================================
    // Local Reads
    // =========================================================================

    /// Cached record, never touching the network.
    pub async fn get_cached(&self, kind: EntityKind, id: &str) -> SyncResult<Option<Entity>> {
        Ok(self.inner.db.entities().get(kind, id).await?)
    }

    pub async fn get_all_cached(&self, kind: EntityKind) -> SyncResult<Vec<Entity>> {
        Ok(self.inner.db.entities().get_all(kind).await?)
    }

    // =========================================================================
    // Local Mutations
    // =========================================================================

    /// Applies a local change and queues it for the remote.
    ///
    /// Returns once the store and queue are updated; the remote call happens
    /// later. A change not newer than the cached record fails with
    /// [`SyncError::StaleWrite`] and nothing is queued.
    pub async fn enqueue_mutation(
        &self,
        operation_type: OperationType,
        entity: &Entity,
    ) -> SyncResult<PendingOperation> {
        validate_entity(entity)?;

        let op = {
            let _guard = self.inner.locks.lock(entity.kind(), entity.id()).await;
            self.inner
                .db
                .record_local_mutation(operation_type, entity, timestamp_now())
                .await?
        };

        self.after_local_mutation();
        Ok(op)
    }

    /// Soft-deletes a cached record: deactivates items and staff, checks in
    /// an open log.
    pub async fn archive(&self, kind: EntityKind, id: &str) -> SyncResult<PendingOperation> {
        let op = {
            let _guard = self.inner.locks.lock(kind, id).await;
            let mut entity = self
                .inner
                .db
                .entities()
                .get(kind, id)
                .await?
                .ok_or_else(|| SyncError::NotFound {
                    entity: kind.to_string(),
                    id: id.to_string(),
                })?;

            // Strictly newer than the cached copy, even within one millisecond.
            let now = timestamp_now().max(entity.last_modified() + 1);
            entity.soft_delete(now);
            self.inner
                .db
                .record_local_mutation(OperationType::Delete, &entity, now)
                .await?
        };

        self.after_local_mutation();
        Ok(op)
    }

    fn after_local_mutation(&self) {
        if self.inner.config.mode().drains_automatically() && self.inner.connectivity.is_connected() {
            self.inner.request_drain(DrainTrigger::Mutation);
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn add_sync_listener(&self, listener: impl SyncStatusListener + 'static) -> ListenerId {
        self.inner.status.add(Arc::new(listener))
    }

    pub fn remove_sync_listener(&self, id: ListenerId) -> bool {
        self.inner.status.remove(id)
    }

    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Last published status; `Idle` until the first drain.
    pub fn current_status(&self) -> SyncStatus {
        self.inner.status.current()
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Drains the queue now and waits for the result.
    ///
    /// Returns `already_running` without touching the queue while another
    /// drain is in flight.
    pub async fn trigger_sync(&self) -> DrainReport {
        attempt_sync(&self.inner).await
    }

    /// Asks the background worker for a drain without waiting.
    pub fn request_sync(&self) {
        self.inner.request_drain(DrainTrigger::Manual);
    }

    /// Merges remote records of one kind into the cache under LWW.
    pub async fn ingest_remote(
        &self,
        kind: EntityKind,
        entities: Vec<Entity>,
    ) -> SyncResult<IngestReport> {
        let repo = self.inner.db.entities();
        let synced_at = timestamp_now();
        let mut report = IngestReport::default();

        for entity in entities {
            if entity.kind() != kind {
                warn!(expected = %kind, actual = %entity.kind(), id = %entity.id(), "Skipping record of wrong kind");
                report.skipped += 1;
                continue;
            }

            let _guard = self.inner.locks.lock(kind, entity.id()).await;
            match repo.put(&entity).await? {
                PutOutcome::Inserted => report.inserted += 1,
                PutOutcome::Replaced => report.replaced += 1,
                PutOutcome::KeptExisting => report.kept += 1,
            }
            repo.mark_synced(kind, entity.id(), synced_at).await?;
        }

        debug!(
            %kind,
            inserted = report.inserted,
            replaced = report.replaced,
            kept = report.kept,
            "Remote records ingested"
        );
        Ok(report)
    }

    /// Fetches every kind from the remote and ingests it.
    pub async fn pull_remote(&self) -> SyncResult<IngestReport> {
        if !self.inner.is_online() {
            return Err(RemoteError::Unavailable("device is offline".into()).into());
        }

        let remote = self.inner.remote.as_ref();
        let timeout = self.inner.config.request_timeout();
        let mut report = IngestReport::default();

        for kind in EntityKind::ALL {
            let entities = retry_with_policy(&self.inner.retry, move |_| async move {
                match tokio::time::timeout(timeout, remote.fetch_all(kind)).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout(timeout)),
                }
            })
            .await?;
            report.merge(self.ingest_remote(kind, entities).await?);
        }

        info!(
            inserted = report.inserted,
            replaced = report.replaced,
            kept = report.kept,
            "Remote snapshot pulled"
        );
        Ok(report)
    }

    // =========================================================================
    // Queue Inspection
    // =========================================================================

    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.inner.db.pending_operations().count().await?)
    }

    pub async fn dead_letters(&self) -> SyncResult<Vec<DeadLetteredOperation>> {
        Ok(self.inner.db.dead_letters().list().await?)
    }

    /// Puts a dead-lettered operation back at the tail of the queue.
    pub async fn requeue_dead_letter(&self, id: &str) -> SyncResult<PendingOperation> {
        let op = self.inner.db.dead_letters().requeue(id).await?;
        info!(op_id = %op.id, kind = %op.entity_kind, entity_id = %op.entity_id, "Dead letter requeued");
        self.after_local_mutation();
        Ok(op)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the drain worker, the periodic timer, the connectivity watcher
    /// and the remote subscription task.
    pub fn start(&self) -> SyncResult<()> {
        let rx = self
            .inner
            .drain_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| SyncError::Internal("sync engine already started".into()))?;

        info!(
            device_id = %self.inner.config.device_id(),
            mode = %self.inner.config.mode(),
            "Starting sync engine"
        );

        let tasks = BackgroundTasks::spawn(self.clone(), rx);
        *self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()) = Some(tasks);
        Ok(())
    }

    /// Stops the background tasks and waits for them. A drain in flight is
    /// cancelled; operations it had not confirmed stay queued.
    pub async fn shutdown(&self) {
        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            info!("Sync engine stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use stockroom_core::{CheckoutLog, Item, Staff};
    use stockroom_db::DbConfig;

    async fn engine_with(remote: Arc<InMemoryRemote>, connected: bool) -> SyncEngine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = SyncConfig::default();
        config.sync.base_backoff_ms = 1;
        SyncEngine::new(db, remote, ConnectivitySignal::new(connected), config)
    }

    #[tokio::test]
    async fn test_enqueue_writes_cache_and_queue() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let item: Entity = Item::new("Multimeter", 10).into();

        let op = engine.enqueue_mutation(OperationType::Create, &item).await.unwrap();

        assert_eq!(op.entity_id, item.id());
        assert_eq!(engine.get_cached(EntityKind::Item, item.id()).await.unwrap(), Some(item));
        assert_eq!(engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_entity_is_refused() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let blank: Entity = Staff::new("", "Ops", 10).into();

        let err = engine.enqueue_mutation(OperationType::Create, &blank).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_mutation_is_refused() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let mut item = Item::new("Tripod", 100);
        engine
            .enqueue_mutation(OperationType::Create, &item.clone().into())
            .await
            .unwrap();

        item.last_modified = 100;
        item.name = "Tripod (old)".into();
        let err = engine
            .enqueue_mutation(OperationType::Update, &item.into())
            .await
            .unwrap_err();

        assert!(err.is_rejected_write());
        assert_eq!(engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_archive_checks_in_log() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let log: Entity = CheckoutLog::open(
            "6f1c1b56-0b9e-4a59-9a55-0a8b7f0d7a11",
            "2d9e8d25-2b7a-4c0c-8a43-3f9b8e1c4f22",
            1_000,
        )
        .into();
        engine.enqueue_mutation(OperationType::Create, &log).await.unwrap();

        let op = engine.archive(EntityKind::CheckoutLog, log.id()).await.unwrap();
        assert_eq!(op.operation_type, OperationType::Delete);

        let cached = engine
            .get_cached(EntityKind::CheckoutLog, log.id())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.as_checkout_log().unwrap().is_open());
        assert!(cached.last_modified() > 1_000);
    }

    #[tokio::test]
    async fn test_archive_unknown_record() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let err = engine.archive(EntityKind::Item, "nope").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ingest_counts_outcomes() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        let local = Item::new("Camera", 100);
        engine
            .enqueue_mutation(OperationType::Create, &local.clone().into())
            .await
            .unwrap();

        let older = Item {
            last_modified: 50,
            ..local.clone()
        };
        let fresh = Item::new("Lens", 10);
        let wrong_kind: Entity = Staff::new("Zoe", "AV", 10).into();

        let report = engine
            .ingest_remote(
                EntityKind::Item,
                vec![older.into(), fresh.into(), wrong_kind],
            )
            .await
            .unwrap();

        assert_eq!(
            report,
            IngestReport {
                inserted: 1,
                replaced: 0,
                kept: 1,
                skipped: 1
            }
        );
        let cached = engine.get_cached(EntityKind::Item, &local.id).await.unwrap().unwrap();
        assert_eq!(cached.last_modified(), 100);
    }

    #[tokio::test]
    async fn test_pull_refused_while_offline() {
        let remote = Arc::new(InMemoryRemote::new());
        let engine = engine_with(remote.clone(), false).await;

        let err = engine.pull_remote().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(remote.calls().fetch_all, 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = engine_with(Arc::new(InMemoryRemote::new()), false).await;
        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.shutdown().await;
    }
}
