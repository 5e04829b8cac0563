//! # Store Errors
//!
//! ```text
//! sqlx::Error ─┐
//! CoreError ───┼──► DbError ──► SyncError::Database ──► caller, or
//! serde_json ──┘                                        SyncStatus::Failed
//!                                                       for a drain
//! ```

use stockroom_core::{CoreError, EntityKind, Timestamp};
use thiserror::Error;

/// Store, queue and dead-letter failures.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A local write carried a timestamp that is not newer than the stored one.
    ///
    /// ## When This Occurs
    /// - The caller edited a stale copy of the record
    /// - Remote ingestion already stored a newer version
    #[error("Stale write to {kind} {id}: incoming {incoming} is not newer than stored {stored}")]
    StaleWrite {
        kind: EntityKind,
        id: String,
        incoming: Timestamp,
        stored: Timestamp,
    },

    /// A row broke a schema constraint (primary key, CHECK, NOT NULL).
    #[error("Constraint violated ({code}): {message}")]
    Constraint { code: String, message: String },

    /// SQLite reported the file locked past the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    /// The database file could not be opened or the pool is gone.
    #[error("Cannot open store: {0}")]
    Unavailable(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored payload or enum column could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Statement failed: {0}")]
    Statement(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

// SQLite primary result codes, the low byte of the extended code.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Classifies by SQLite result code rather than message text.
///
/// ```text
/// RowNotFound                 → NotFound
/// Database, code & 0xff = 19  → Constraint
/// Database, code & 0xff = 5/6 → Busy
/// PoolTimedOut                → Busy
/// PoolClosed, Io, Tls         → Unavailable
/// ColumnDecode, Decode        → Corrupt
/// anything else               → Statement
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "<query>"),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                let primary = code.parse::<i32>().map(|c| c & 0xff).unwrap_or(-1);
                let message = db_err.message().to_string();
                match primary {
                    SQLITE_CONSTRAINT => DbError::Constraint { code, message },
                    SQLITE_BUSY | SQLITE_LOCKED => DbError::Busy(message),
                    _ => DbError::Statement(message),
                }
            }
            sqlx::Error::PoolTimedOut => DbError::Busy("no free connection".to_string()),
            sqlx::Error::PoolClosed => DbError::Unavailable("pool closed".to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DbError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Corrupt(err.to_string())
            }
            other => DbError::Statement(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        DbError::Corrupt(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Corrupt(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
