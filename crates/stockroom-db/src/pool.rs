//! # Store Handle
//!
//! Opens the on-device SQLite file and owns the transactions that touch more
//! than one table.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Database                                   │
//! │                                                                         │
//! │  DbConfig ──► connect_options() ──► SqlitePool ──► migrations           │
//! │                (WAL, busy timeout,   (file: up to max_connections       │
//! │                 foreign keys)         memory: exactly one, never reaped)│
//! │                                                                         │
//! │  single-table work          entities() / pending_operations() /        │
//! │                             dead_letters()                              │
//! │                                                                         │
//! │  multi-table transactions   record_local_mutation                      │
//! │                               LWW put + enqueue, or neither            │
//! │                             confirm_operation                          │
//! │                               dequeue + write-back + pending flag      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A drain writing back confirmed records never blocks UI reads of the
//! cache: the file runs in WAL mode.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::dead_letter::DeadLetterRepository;
use crate::repository::entity::{
    refresh_pending_flag, stored_last_modified, upsert_lww, EntityRepository, PutOutcome,
};
use crate::repository::pending::{
    delete_operation, insert_operation, queued_for_entity, PendingOperationRepository,
};
use stockroom_core::{Entity, OperationType, PendingOperation, Timestamp};

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Where the store lives and how the pool around it behaves.
///
/// ```rust,ignore
/// let config = DbConfig::new(sync_config.database_path())
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
    /// Default 5; forced to 1 for in-memory stores.
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,
    /// How long SQLite retries a locked file before reporting busy.
    pub busy_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub run_migrations: bool,
}

impl DbConfig {
    /// A store file at `path`, created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// A throwaway store for tests. Its data lives in the one pooled
    /// connection, so that connection is never closed.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: None,
            ..DbConfig::new(MEMORY_PATH)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new()
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout);
        if self.is_in_memory() {
            options.max_connections(1).max_lifetime(None::<Duration>)
        } else {
            options.max_connections(self.max_connections.max(1))
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the local store. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the store and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .map_err(|e| {
                DbError::Unavailable(format!("{}: {e}", config.database_path.display()))
            })?;

        info!(
            path = %config.database_path.display(),
            in_memory = config.is_in_memory(),
            max_connections = config.max_connections,
            "Store opened"
        );

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    /// Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await?;
        debug!("Schema checked");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cached records.
    pub fn entities(&self) -> EntityRepository {
        EntityRepository::new(self.pool.clone())
    }

    /// Operations waiting for the remote.
    pub fn pending_operations(&self) -> PendingOperationRepository {
        PendingOperationRepository::new(self.pool.clone())
    }

    /// Operations parked for manual recovery.
    pub fn dead_letters(&self) -> DeadLetterRepository {
        DeadLetterRepository::new(self.pool.clone())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Applies a local mutation and enqueues it, in one transaction.
    ///
    /// ```text
    /// BEGIN
    ///   upsert entity (LWW, pending_sync = 1)
    ///     └── not newer than stored? → ROLLBACK, StaleWrite
    ///   insert pending operation (payload = entity snapshot)
    /// COMMIT
    /// ```
    pub async fn record_local_mutation(
        &self,
        operation_type: OperationType,
        entity: &Entity,
        now: Timestamp,
    ) -> DbResult<PendingOperation> {
        let op = PendingOperation::capture(operation_type, entity, now)?;

        let mut tx = self.pool.begin().await?;

        let outcome = upsert_lww(&mut tx, entity, Some(true)).await?;
        if !outcome.is_written() {
            let stored = stored_last_modified(&mut tx, entity.kind(), entity.id())
                .await?
                .unwrap_or_default();
            // Dropping `tx` rolls back.
            return Err(DbError::StaleWrite {
                kind: entity.kind(),
                id: entity.id().to_string(),
                incoming: entity.last_modified(),
                stored,
            });
        }

        insert_operation(&mut tx, &op).await?;
        tx.commit().await?;

        debug!(
            op_id = %op.id,
            kind = %op.entity_kind,
            entity_id = %op.entity_id,
            op_type = %op.operation_type,
            outcome = ?outcome,
            "Local mutation recorded"
        );

        Ok(op)
    }

    /// Completes a remotely confirmed operation, in one transaction.
    ///
    /// Removes the queue row, writes the remote's version back under LWW and
    /// clears the pending flag once nothing else is queued for the record.
    ///
    /// While later operations for the same record are still queued the local
    /// copy is ahead of the remote, so the write-back is skipped (`None`).
    pub async fn confirm_operation(
        &self,
        op: &PendingOperation,
        confirmed: Option<&Entity>,
    ) -> DbResult<Option<PutOutcome>> {
        let mut tx = self.pool.begin().await?;

        delete_operation(&mut tx, &op.id).await?;
        let later_queued = queued_for_entity(&mut tx, op.entity_kind, &op.entity_id).await?;
        let outcome = match confirmed {
            Some(entity) if !later_queued => Some(upsert_lww(&mut tx, entity, None).await?),
            _ => None,
        };
        refresh_pending_flag(&mut tx, op.entity_kind, &op.entity_id).await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Drops `op` without sending it when the cache already holds a newer
    /// version of the record than the one `op` carries.
    ///
    /// Only the last queued operation for a record can be superseded; earlier
    /// ones are local history the later ones build on. Returns whether the
    /// operation was dropped.
    pub async fn supersede_stale_operation(
        &self,
        op: &PendingOperation,
        carried: Timestamp,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(stored) = stored_last_modified(&mut tx, op.entity_kind, &op.entity_id).await?
        else {
            return Ok(false);
        };
        if stored <= carried {
            return Ok(false);
        }

        if !delete_operation(&mut tx, &op.id).await? {
            return Ok(false);
        }
        if queued_for_entity(&mut tx, op.entity_kind, &op.entity_id).await? {
            // Dropping `tx` rolls back.
            return Ok(false);
        }
        refresh_pending_flag(&mut tx, op.entity_kind, &op.entity_id).await?;
        tx.commit().await?;

        debug!(
            op_id = %op.id,
            kind = %op.entity_kind,
            entity_id = %op.entity_id,
            carried,
            stored,
            "Queued operation superseded by a newer cached version"
        );
        Ok(true)
    }

    /// Waits for checked-out connections, then closes the pool. Later
    /// repository calls fail with [`DbError::Unavailable`].
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Store closed");
    }

    /// True when a trivial statement round-trips.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
