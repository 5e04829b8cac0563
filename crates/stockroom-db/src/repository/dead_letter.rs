//! # Dead Letter Repository
//!
//! Operations that left the queue without reaching the remote store. Raw
//! payloads are kept verbatim so nothing is silently lost.
//!
//! ```text
//!   pending_operations ──dead_letter()──► dead_letters
//!           ▲                                  │
//!           └──────────requeue()───────────────┘   (tail of the queue)
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::repository::entity::refresh_pending_flag;
use crate::repository::pending::{delete_operation, insert_operation};
use stockroom_core::{timestamp_now, DeadLetterReason, DeadLetteredOperation, PendingOperation};

const SELECT_DEAD_LETTER: &str = r#"
    SELECT id, entity_kind, entity_id, operation_type, raw_payload,
           reason, detail, created_at, dead_lettered_at
    FROM dead_letters
"#;

async fn insert_dead_letter(
    conn: &mut SqliteConnection,
    dead: &DeadLetteredOperation,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO dead_letters (
            id, entity_kind, entity_id, operation_type, raw_payload,
            reason, detail, created_at, dead_lettered_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            raw_payload = excluded.raw_payload,
            reason = excluded.reason,
            detail = excluded.detail,
            dead_lettered_at = excluded.dead_lettered_at
        "#,
    )
    .bind(&dead.id)
    .bind(dead.entity_kind)
    .bind(&dead.entity_id)
    .bind(dead.operation_type)
    .bind(&dead.raw_payload)
    .bind(dead.reason)
    .bind(&dead.detail)
    .bind(dead.created_at)
    .bind(dead.dead_lettered_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Repository for dead-lettered operations.
#[derive(Debug, Clone)]
pub struct DeadLetterRepository {
    pool: SqlitePool,
}

impl DeadLetterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DeadLetterRepository { pool }
    }

    /// Moves `op` out of the queue into the dead-letter list.
    pub async fn dead_letter(
        &self,
        op: &PendingOperation,
        reason: DeadLetterReason,
        detail: &str,
    ) -> DbResult<DeadLetteredOperation> {
        let dead = DeadLetteredOperation::from_operation(op, reason, detail, timestamp_now());
        self.park(&dead).await?;
        Ok(dead)
    }

    /// Stores an already-built dead letter and drops its queue row, atomically.
    pub async fn park(&self, dead: &DeadLetteredOperation) -> DbResult<()> {
        warn!(
            op_id = %dead.id,
            kind = %dead.entity_kind,
            entity_id = %dead.entity_id,
            reason = %dead.reason,
            detail = %dead.detail,
            "Dead-lettering operation"
        );

        let mut tx = self.pool.begin().await?;
        insert_dead_letter(&mut tx, dead).await?;
        delete_operation(&mut tx, &dead.id).await?;
        refresh_pending_flag(&mut tx, dead.entity_kind, &dead.entity_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// All dead letters, oldest first.
    pub async fn list(&self) -> DbResult<Vec<DeadLetteredOperation>> {
        let sql = format!("{SELECT_DEAD_LETTER} ORDER BY dead_lettered_at ASC, id ASC");
        let rows = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<DeadLetteredOperation>> {
        let sql = format!("{SELECT_DEAD_LETTER} WHERE id = ?1");
        let row = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    /// Moves a dead letter back to the tail of the queue with attempts reset.
    pub async fn requeue(&self, id: &str) -> DbResult<PendingOperation> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("{SELECT_DEAD_LETTER} WHERE id = ?1");
        let dead: DeadLetteredOperation = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Dead letter", id))?;

        let op = dead.to_operation();
        sqlx::query("DELETE FROM dead_letters WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_operation(&mut tx, &op).await?;
        refresh_pending_flag(&mut tx, op.entity_kind, &op.entity_id).await?;
        tx.commit().await?;

        Ok(op)
    }

    /// Permanently discards a dead letter.
    pub async fn purge(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
