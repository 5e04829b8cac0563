//! # Queue Drain
//!
//! One pass over the pending operation queue.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt_sync                                                           │
//! │                                                                         │
//! │  drain_guard.try_lock() ── busy ──► DrainReport { already_running }     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  offline? ──────────────────────► OFFLINE   (no remote call)            │
//! │  queue empty? ──────────────────► COMPLETE                              │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  IN_PROGRESS, snapshot queue (later enqueues wait for the next cycle)   │
//! │        │                                                                │
//! │        ├── undecodable rows ──► dead letters (counted failed)          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  lanes: 1 lane in enqueue order, or one lane per (kind, entity_id)      │
//! │  run up to max_concurrent_partitions lanes at once                      │
//! │        │                                                                │
//! │        ▼  per operation                                                 │
//! │  connected? ── no ──► defer the rest, end OFFLINE                       │
//! │  cache newer than payload, nothing queued after? ──► drop unsent        │
//! │  send with retry + timeout                                              │
//! │    ok        → confirm (LWW write-back, dequeue, clear pending flag)    │
//! │    rejected  → dead letter                                              │
//! │    transient → record_attempt, block this entity for the cycle          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  all succeeded → COMPLETE, else PARTIAL; store fault → FAILED           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures_util::stream::{self, StreamExt};
use stockroom_core::{
    DeadLetterReason, Entity, EntityKind, OperationType, PendingOperation, QueueEntry, SyncStatus,
};
use tracing::{debug, error, info, warn};

use crate::engine::EngineInner;
use crate::error::{RemoteError, SyncResult};
use crate::remote::{RemoteAdapter, RemoteResult};
use crate::retry::retry_with_policy;

// =============================================================================
// Triggers and Reports
// =============================================================================

/// Why the background worker was asked to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    Timer,
    ConnectivityRegained,
    Mutation,
    Manual,
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DrainTrigger::Timer => "timer",
            DrainTrigger::ConnectivityRegained => "connectivity_regained",
            DrainTrigger::Mutation => "mutation",
            DrainTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Outcome of one drain request.
///
/// `succeeded + failed + deferred == total` for every drain that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub status: SyncStatus,
    /// Operations in the snapshot.
    pub total: usize,
    pub succeeded: usize,
    /// Exhausted retries, rejections and undecodable rows.
    pub failed: usize,
    /// Subset of `failed` moved to the dead-letter list.
    pub dead_lettered: usize,
    /// Subset of `succeeded` dropped unsent because the cache already held a
    /// newer version of the record.
    pub superseded: usize,
    /// Left queued untried (entity blocked earlier, or connectivity lost).
    pub deferred: usize,
    /// Another drain was already running; nothing was touched.
    pub already_running: bool,
}

impl DrainReport {
    fn settled(status: SyncStatus) -> Self {
        DrainReport {
            status,
            total: 0,
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
            superseded: 0,
            deferred: 0,
            already_running: false,
        }
    }

    pub(crate) fn already_running(current: SyncStatus) -> Self {
        DrainReport {
            already_running: true,
            ..Self::settled(current)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Complete
    }
}

#[derive(Debug, Default)]
struct LaneOutcome {
    succeeded: usize,
    failed: usize,
    dead_lettered: usize,
    superseded: usize,
    deferred: usize,
    went_offline: bool,
}

type Lane = Vec<(PendingOperation, Entity)>;

// =============================================================================
// Drain
// =============================================================================

/// Runs one drain unless one is already in flight.
pub(crate) async fn attempt_sync(inner: &EngineInner) -> DrainReport {
    let Ok(_guard) = inner.drain_guard.try_lock() else {
        debug!("Drain already in progress, request ignored");
        return DrainReport::already_running(inner.status.current());
    };

    match run_drain(inner).await {
        Ok(report) => {
            inner.status.publish(report.status);
            report
        }
        Err(e) => {
            error!(error = %e, "Drain aborted");
            inner.status.publish(SyncStatus::Failed);
            DrainReport::settled(SyncStatus::Failed)
        }
    }
}

async fn run_drain(inner: &EngineInner) -> SyncResult<DrainReport> {
    if !inner.is_online() {
        debug!("Offline, drain skipped");
        return Ok(DrainReport::settled(SyncStatus::Offline));
    }

    let snapshot = inner.db.pending_operations().all().await?;
    if snapshot.is_empty() {
        return Ok(DrainReport::settled(SyncStatus::Complete));
    }

    inner.status.publish(SyncStatus::InProgress);
    let total = snapshot.len();
    info!(total, "Draining pending operations");

    let mut report = DrainReport {
        total,
        ..DrainReport::settled(SyncStatus::InProgress)
    };

    let mut sendable = Vec::with_capacity(total);
    for entry in snapshot {
        match entry {
            QueueEntry::Operation { op, entity } => sendable.push((op, entity)),
            QueueEntry::DeadLettered(dead) => {
                inner.db.dead_letters().park(&dead).await?;
                report.failed += 1;
                report.dead_lettered += 1;
            }
        }
    }

    let concurrency = inner.config.sync.max_concurrent_partitions.max(1);
    let lanes = into_lanes(sendable, concurrency);

    let outcomes: Vec<SyncResult<LaneOutcome>> = stream::iter(lanes)
        .map(|lane| drain_lane(inner, lane))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut went_offline = false;
    for outcome in outcomes {
        let outcome = outcome?;
        report.succeeded += outcome.succeeded;
        report.failed += outcome.failed;
        report.dead_lettered += outcome.dead_lettered;
        report.superseded += outcome.superseded;
        report.deferred += outcome.deferred;
        went_offline |= outcome.went_offline;
    }

    report.status = if went_offline {
        SyncStatus::Offline
    } else if report.succeeded == report.total {
        SyncStatus::Complete
    } else {
        SyncStatus::Partial
    };

    info!(
        status = %report.status,
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        dead_lettered = report.dead_lettered,
        superseded = report.superseded,
        deferred = report.deferred,
        "Drain finished"
    );

    Ok(report)
}

/// Splits the snapshot into independently drainable lanes.
///
/// With a concurrency of 1 everything runs in one lane, in enqueue order.
/// Otherwise each record gets its own lane, ordered by its first operation.
fn into_lanes(ops: Lane, concurrency: usize) -> Vec<Lane> {
    if concurrency <= 1 {
        return vec![ops];
    }

    let mut lanes: Vec<Lane> = Vec::new();
    let mut index: HashMap<(EntityKind, String), usize> = HashMap::new();
    for (op, entity) in ops {
        let key = (op.entity_kind, op.entity_id.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[slot].push((op, entity));
    }
    lanes
}

async fn drain_lane(inner: &EngineInner, lane: Lane) -> SyncResult<LaneOutcome> {
    let mut outcome = LaneOutcome::default();
    // Records with a failed operation this cycle; later ops must wait.
    let mut blocked: HashSet<(EntityKind, String)> = HashSet::new();

    for (op, entity) in lane {
        let key = (op.entity_kind, op.entity_id.clone());
        if outcome.went_offline || blocked.contains(&key) {
            outcome.deferred += 1;
            continue;
        }
        if !inner.is_online() {
            warn!(op_id = %op.id, "Connectivity lost during drain");
            outcome.went_offline = true;
            outcome.deferred += 1;
            continue;
        }

        // Remote ingestion may have cached a newer version since this
        // snapshot was queued. Pushing it would overwrite that version.
        let superseded = {
            let _guard = inner.locks.lock(op.entity_kind, &op.entity_id).await;
            inner
                .db
                .supersede_stale_operation(&op, entity.last_modified())
                .await?
        };
        if superseded {
            outcome.succeeded += 1;
            outcome.superseded += 1;
            continue;
        }

        match send_with_retry(inner, &op, &entity).await {
            Ok(confirmed) => {
                let _guard = inner.locks.lock(op.entity_kind, &op.entity_id).await;
                inner.db.confirm_operation(&op, confirmed.as_ref()).await?;
                debug!(
                    op_id = %op.id,
                    kind = %op.entity_kind,
                    entity_id = %op.entity_id,
                    op_type = %op.operation_type,
                    "Operation confirmed"
                );
                outcome.succeeded += 1;
            }
            Err(err) if err.is_permanent() && inner.config.sync.dead_letter_rejected => {
                inner
                    .db
                    .dead_letters()
                    .dead_letter(&op, DeadLetterReason::Rejected, &err.to_string())
                    .await?;
                outcome.failed += 1;
                outcome.dead_lettered += 1;
            }
            Err(err) => {
                warn!(
                    op_id = %op.id,
                    kind = %op.entity_kind,
                    entity_id = %op.entity_id,
                    error = %err,
                    "Operation left queued"
                );
                inner
                    .db
                    .pending_operations()
                    .record_attempt(&op.id, &err.to_string())
                    .await?;
                outcome.failed += 1;
                blocked.insert(key);
            }
        }
    }

    Ok(outcome)
}

/// Sends one operation, retrying transient failures per the retry policy.
async fn send_with_retry(
    inner: &EngineInner,
    op: &PendingOperation,
    entity: &Entity,
) -> RemoteResult<Option<Entity>> {
    let remote = inner.remote.as_ref();
    let timeout = inner.config.request_timeout();

    retry_with_policy(&inner.retry, move |attempt| async move {
        debug!(attempt, op_id = %op.id, op_type = %op.operation_type, "Sending operation");
        match tokio::time::timeout(timeout, dispatch(remote, op, entity)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    })
    .await
}

/// Maps an operation onto the matching remote call.
///
/// Returns the remote's version of the record, if the call yields one.
async fn dispatch(
    remote: &dyn RemoteAdapter,
    op: &PendingOperation,
    entity: &Entity,
) -> RemoteResult<Option<Entity>> {
    match op.operation_type {
        OperationType::Create => remote.create(entity).await.map(Some),
        OperationType::Update => remote.update(&op.entity_id, entity).await.map(Some),
        OperationType::Delete => remote
            .archive(op.entity_kind, &op.entity_id)
            .await
            .map(|()| None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::{Item, Staff};

    fn op_for(entity: &Entity, seq: i64) -> (PendingOperation, Entity) {
        let op = PendingOperation::capture(OperationType::Update, entity, seq).unwrap();
        (op, entity.clone())
    }

    #[test]
    fn test_single_lane_keeps_enqueue_order() {
        let a: Entity = Item::new("A", 1).into();
        let b: Entity = Staff::new("B", "Ops", 1).into();
        let ops = vec![op_for(&a, 1), op_for(&b, 2), op_for(&a, 3)];

        let lanes = into_lanes(ops, 1);
        assert_eq!(lanes.len(), 1);
        let created: Vec<i64> = lanes[0].iter().map(|(op, _)| op.created_at).collect();
        assert_eq!(created, vec![1, 2, 3]);
    }

    #[test]
    fn test_partition_lanes_group_by_record() {
        let a: Entity = Item::new("A", 1).into();
        let b: Entity = Item::new("B", 1).into();
        let ops = vec![op_for(&a, 1), op_for(&b, 2), op_for(&a, 3)];

        let lanes = into_lanes(ops, 4);
        assert_eq!(lanes.len(), 2);
        assert!(lanes[0].iter().all(|(op, _)| op.entity_id == a.id()));
        let created: Vec<i64> = lanes[0].iter().map(|(op, _)| op.created_at).collect();
        assert_eq!(created, vec![1, 3]);
        assert_eq!(lanes[1].len(), 1);
    }

    #[test]
    fn test_already_running_report() {
        let report = DrainReport::already_running(SyncStatus::InProgress);
        assert!(report.already_running);
        assert_eq!(report.total, 0);
        assert!(!report.is_complete());
    }
}
