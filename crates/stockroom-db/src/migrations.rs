//! # Schema Migrations
//!
//! The schema ships inside the binary; `Database::new` brings any store it
//! opens up to date before handing out connections.
//!
//! ```text
//! migrations/sqlite/
//!   001_initial_schema.sql   entities            one row per (kind, id), LWW payload
//!                            pending_operations  FIFO by seq, upsert by id
//!                            dead_letters        parked operations + reason
//! ```
//!
//! Applied versions live in `_sqlx_migrations`. Files are append-only: a
//! schema change is a new `NNN_description.sql`, never an edit.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every embedded migration the store has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let known = MIGRATOR.migrations.len();
    MIGRATOR.run(pool).await?;
    info!(migrations = known, "Store schema up to date");
    Ok(())
}

/// `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok((MIGRATOR.migrations.len(), applied.max(0) as usize))
}
