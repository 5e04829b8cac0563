//! # stockroom-sync: Sync Engine for Stockroom
//!
//! Offline-first synchronization of items, staff and checkout logs between
//! the local SQLite cache and an authoritative remote store.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncEngine (engine.rs)                      │  │
//! │  │                                                                  │  │
//! │  │  Local reads and mutations, remote ingestion, status fan-out    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Drain        │  │ RemoteAdapter  │  │  Worker                │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Queue snapshot │  │ InMemoryRemote │  │ Timer, connectivity,   │    │
//! │  │ Retry/backoff  │  │ RestRemote     │  │ mutation triggers,     │    │
//! │  │ Dead letters   │  │                │  │ push ingestion         │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  CONFLICT POLICY: last-writer-wins on last_modified, ties keep the     │
//! │  cached record. Applied to local mutations, drain write-backs and      │
//! │  remote ingestion alike.                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Sync configuration (mode, intervals, retry, remote URL)
//! - [`connectivity`] - Shared reachability flag
//! - [`drain`] - Queue drain and its report
//! - [`engine`] - The `SyncEngine` facade
//! - [`error`] - Sync and remote error types
//! - [`listener`] - Status listeners
//! - [`locks`] - Per-entity async locks
//! - [`remote`] - Remote adapter trait and bindings
//! - [`retry`] - Bounded exponential backoff
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockroom_sync::{ConnectivitySignal, InMemoryRemote, SyncConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(
//!     database,
//!     Arc::new(InMemoryRemote::new()),
//!     ConnectivitySignal::connected(),
//!     SyncConfig::load_or_default(None),
//! );
//! engine.add_sync_listener(|status| println!("sync: {status}"));
//! engine.start()?;
//!
//! engine.enqueue_mutation(OperationType::Create, &item.into()).await?;
//! let report = engine.trigger_sync().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod drain;
pub mod engine;
pub mod error;
pub mod listener;
pub mod locks;
pub mod remote;
pub mod retry;

mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{SyncConfig, SyncMode};
pub use connectivity::{ConnectionState, ConnectivitySignal};
pub use drain::{DrainReport, DrainTrigger};
pub use engine::{IngestReport, SyncEngine};
pub use error::{RemoteError, SyncError, SyncResult};
pub use listener::{ListenerId, SyncStatusListener};
pub use remote::{InMemoryRemote, RemoteAdapter, RemoteChange, RestRemote, Subscription};
pub use retry::RetryPolicy;

pub use stockroom_core::SyncStatus;
