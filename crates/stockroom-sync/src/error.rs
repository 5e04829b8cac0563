//! # Sync Error Types
//!
//! Error types for the sync engine and remote adapters.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Errors                                     │
//! │                                                                         │
//! │  RemoteError (one remote call)                                         │
//! │  ├── Unavailable   connect refused, DNS        ─┐                      │
//! │  ├── Timeout       request_timeout elapsed      │ transient:           │
//! │  ├── Server        HTTP 5xx                     │ retried with backoff │
//! │  ├── Decode        unreadable response         ─┘                      │
//! │  └── Rejected      HTTP 4xx                    → permanent:            │
//! │                                                  dead-lettered         │
//! │                                                                         │
//! │  SyncError (what engine callers see)                                   │
//! │  ├── Configuration   InvalidConfig, InvalidUrl, ConfigLoad/Save        │
//! │  ├── Local writes    Validation, StaleWrite                            │
//! │  ├── Storage         Database                                          │
//! │  ├── Remote          Remote(RemoteError)                               │
//! │  └── Internal        ChannelError, ShuttingDown, Internal              │
//! │                                                                         │
//! │  Remote failures during a drain never become SyncError for mutation    │
//! │  callers; they surface through SyncStatus and logs only.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use stockroom_core::{CoreError, EntityKind, Timestamp, ValidationError};
use stockroom_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Remote Error
// =============================================================================

/// Failure of a single remote store call.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within the request timeout.
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote failed while handling the request.
    #[error("Remote server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The remote refused the operation; retrying will not help.
    #[error("Remote rejected operation ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response could not be decoded.
    #[error("Failed to decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Returns true when retrying cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }

    pub fn is_transient(&self) -> bool {
        !self.is_permanent()
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering every engine-level failure.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Device ID not configured")]
    MissingDeviceId,

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Write Errors
    // =========================================================================
    /// The entity failed validation before touching the store.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The mutation's timestamp is not newer than the cached record.
    #[error("Stale write to {kind} {id}: {incoming} is not newer than {stored}")]
    StaleWrite {
        kind: EntityKind,
        id: String,
        incoming: Timestamp,
        stored: Timestamp,
    },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(DbError),

    /// No record (or dead letter) with this id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error(transparent)]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Sync engine is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StaleWrite {
                kind,
                id,
                incoming,
                stored,
            } => SyncError::StaleWrite {
                kind,
                id,
                incoming,
                stored,
            },
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::Database(other),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => SyncError::Validation(e),
            other => SyncError::SerializationFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the failed call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Database(DbError::Busy(_)) => true,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller's input was refused (nothing was written).
    pub fn is_rejected_write(&self) -> bool {
        matches!(self, SyncError::Validation(_) | SyncError::StaleWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejections_are_permanent() {
        assert!(RemoteError::Rejected {
            status: 404,
            message: "gone".into()
        }
        .is_permanent());

        for transient in [
            RemoteError::Unavailable("refused".into()),
            RemoteError::Timeout(Duration::from_secs(30)),
            RemoteError::Server {
                status: 503,
                message: "busy".into(),
            },
            RemoteError::Decode("eof".into()),
        ] {
            assert!(transient.is_transient(), "{transient}");
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Remote(RemoteError::Unavailable("x".into())).is_retryable());
        assert!(!SyncError::Remote(RemoteError::Rejected {
            status: 400,
            message: "bad".into()
        })
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
    }

    #[test]
    fn test_stale_write_maps_from_db() {
        let err: SyncError = DbError::StaleWrite {
            kind: EntityKind::Staff,
            id: "s1".into(),
            incoming: 5,
            stored: 9,
        }
        .into();
        assert!(err.is_rejected_write());
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("nope".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());
    }
}
