//! # Pending Operation Repository
//!
//! The durable outbox of local mutations waiting for remote confirmation.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL MUTATION (Database::record_local_mutation)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. LWW upsert into entities (pending_sync = 1)                 │   │
//! │  │  2. INSERT INTO pending_operations (payload snapshot)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            DRAIN (stockroom-sync)                               │   │
//! │  │  1. all() → snapshot ordered by seq                             │   │
//! │  │  2. For each op:                                                │   │
//! │  │     a. Send to remote                                           │   │
//! │  │     b. Success: Database::confirm_operation (removes the row)   │   │
//! │  │     c. Failure: record_attempt (attempts += 1, last_error)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A row leaves the queue only on remote success or dead-lettering     │
//! │  • Retries reuse the same operation id                                 │
//! │  • Overwriting by id keeps the original queue position                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockroom_core::{timestamp_now, EntityKind, PendingOperation, QueueEntry};

// =============================================================================
// Connection-level helpers (usable inside transactions)
// =============================================================================

/// Appends `op`, or overwrites the payload of an existing row with the same id.
pub(crate) async fn insert_operation(
    conn: &mut SqliteConnection,
    op: &PendingOperation,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_operations (
            id, entity_kind, entity_id, operation_type, payload,
            created_at, attempts, last_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            operation_type = excluded.operation_type,
            payload = excluded.payload
        "#,
    )
    .bind(&op.id)
    .bind(op.entity_kind)
    .bind(&op.entity_id)
    .bind(op.operation_type)
    .bind(&op.payload)
    .bind(op.created_at)
    .bind(op.attempts)
    .bind(&op.last_error)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_operation(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether any queued operation targets this record.
pub(crate) async fn queued_for_entity(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
) -> DbResult<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM pending_operations
            WHERE entity_kind = ?1 AND entity_id = ?2
        )
        "#,
    )
    .bind(kind)
    .bind(entity_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the pending operation queue.
#[derive(Debug, Clone)]
pub struct PendingOperationRepository {
    pool: SqlitePool,
}

impl PendingOperationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PendingOperationRepository { pool }
    }

    /// Appends or overwrites by `op.id`.
    ///
    /// Prefer [`crate::Database::record_local_mutation`], which writes the
    /// entity in the same transaction.
    pub async fn enqueue(&self, op: &PendingOperation) -> DbResult<()> {
        debug!(
            op_id = %op.id,
            kind = %op.entity_kind,
            entity_id = %op.entity_id,
            op_type = %op.operation_type,
            "Enqueue pending operation"
        );

        let mut conn = self.pool.acquire().await?;
        insert_operation(&mut conn, op).await
    }

    /// Raw operations in enqueue order.
    pub async fn operations(&self) -> DbResult<Vec<PendingOperation>> {
        let ops = sqlx::query_as(
            r#"
            SELECT id, entity_kind, entity_id, operation_type, payload,
                   created_at, attempts, last_error
            FROM pending_operations
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ops)
    }

    /// Snapshot for draining, in enqueue order.
    ///
    /// Operations whose payload no longer decodes come back as
    /// [`QueueEntry::DeadLettered`]; they are still in the table until the
    /// caller parks them with the dead-letter repository.
    pub async fn all(&self) -> DbResult<Vec<QueueEntry>> {
        let now = timestamp_now();
        Ok(self
            .operations()
            .await?
            .into_iter()
            .map(|op| QueueEntry::classify(op, now))
            .collect())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<PendingOperation>> {
        let op = sqlx::query_as(
            r#"
            SELECT id, entity_kind, entity_id, operation_type, payload,
                   created_at, attempts, last_error
            FROM pending_operations
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(op)
    }

    /// Removes an operation. Only called after confirmed remote success.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        delete_operation(&mut conn, id).await
    }

    pub async fn is_empty(&self) -> DbResult<bool> {
        Ok(self.count().await? == 0)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Records a failed drain cycle for an operation.
    pub async fn record_attempt(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_operations SET
                attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether any queued operation targets this record.
    pub async fn has_pending_for(&self, kind: EntityKind, entity_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        queued_for_entity(&mut conn, kind, entity_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
