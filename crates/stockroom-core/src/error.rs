//! # Error Types
//!
//! ```text
//! ValidationError ──► CoreError ──► DbError (stockroom-db) ──► SyncError
//!   bad field          bad payload                              (stockroom-sync)
//!                      unknown kind/op
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unrecognised entity kind string (database row, config, URL path).
    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Unknown operation type: {0}")]
    UnknownOperationType(String),

    /// A payload decoded to a record with a different id than the queue row.
    ///
    /// ## When This Occurs
    /// - A queue row was hand-edited or corrupted on disk
    /// - A remote returned a different record than the one sent
    #[error("Entity id mismatch: expected {expected}, got {actual}")]
    EntityIdMismatch { expected: String, actual: String },

    /// Payload could not be serialized or parsed.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before a local mutation touches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Empty or whitespace-only.
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Not a UUID, usually.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two timestamps are in the wrong order.
    #[error("{field} must not be before {other}")]
    OutOfOrder { field: String, other: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
