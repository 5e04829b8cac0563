//! # stockroom-core: Domain Types for Stockroom Sync
//!
//! Entities, pending operations, dead letters and sync status shared by the
//! database layer and the sync engine. Pure types with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Stockroom Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI / agent binary (callers)                     │   │
//! │  │    enqueue_mutation ──► get_cached ──► add_sync_listener        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockroom-sync (engine)                         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockroom-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌───────────────┐  ┌───────────────┐      │   │
//! │  │   │     types     │  │     error     │  │  validation   │      │   │
//! │  │   │ Item, Staff   │  │  CoreError    │  │  ids, names   │      │   │
//! │  │   │ CheckoutLog   │  │  Validation   │  │  timestamps   │      │   │
//! │  │   │ PendingOp     │  │  Error        │  │               │      │   │
//! │  │   └───────────────┘  └───────────────┘  └───────────────┘      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockroom-db (Database Layer)                   │   │
//! │  │        entity store, operation queue, dead letters              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities, pending operations, sync status
//! - [`error`] - Domain error types
//! - [`validation`] - Local mutation validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stockroom_core::{Entity, Item, OperationType, PendingOperation};
//!
//! let item = Entity::from(Item::new("Torque wrench", 1_700_000_000_000));
//! let op = PendingOperation::capture(OperationType::Create, &item, 1_700_000_000_000).unwrap();
//!
//! assert_eq!(op.entity().unwrap(), item);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of names and departments, in characters.
pub const MAX_NAME_LENGTH: usize = 200;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Only the engine and the database layer call this; types take explicit
/// timestamps so they stay deterministic.
pub fn timestamp_now() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
