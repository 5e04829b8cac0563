//! # Remote Adapters
//!
//! The authoritative store the engine syncs against, behind one trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RemoteAdapter                                   │
//! │                                                                         │
//! │   create(entity)      ──► confirmed Entity (remote lastModified)        │
//! │   update(id, entity)  ──► confirmed Entity                              │
//! │   archive(kind, id)   ──► ()   soft delete / check-in                   │
//! │   fetch_all(kind)     ──► Vec<Entity>   full snapshot                   │
//! │   subscribe()         ──► Option<Subscription>   push; None = poll      │
//! │                                                                         │
//! │   ┌────────────────────┐        ┌────────────────────┐                 │
//! │   │  InMemoryRemote    │        │  RestRemote        │                 │
//! │   │  (memory.rs)       │        │  (rest.rs)         │                 │
//! │   │  tests and demos   │        │  reqwest + JSON    │                 │
//! │   └────────────────────┘        └────────────────────┘                 │
//! │                                                                         │
//! │   Adapters never retry. One call = one attempt; the engine owns         │
//! │   backoff and timeouts.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod memory;
mod rest;

pub use memory::{CallCounts, InMemoryRemote};
pub use rest::RestRemote;

use async_trait::async_trait;
use stockroom_core::{Entity, EntityKind};
use tokio::sync::mpsc;

use crate::error::RemoteError;

/// Result of one remote call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A batch of remote-side changes for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub kind: EntityKind,
    pub entities: Vec<Entity>,
}

/// Push stream of remote changes. Ends when the remote drops its sender.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<RemoteChange>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<RemoteChange>) -> Self {
        Subscription { rx }
    }

    /// Waits for the next change batch.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        self.rx.recv().await
    }
}

/// Network-facing store for items, staff and checkout logs.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Creates the record; returns it as the remote now holds it.
    async fn create(&self, entity: &Entity) -> RemoteResult<Entity>;

    /// Replaces record `id`; returns it as the remote now holds it.
    async fn update(&self, id: &str, entity: &Entity) -> RemoteResult<Entity>;

    /// Soft-deletes record `id` (deactivates, or checks a log in).
    async fn archive(&self, kind: EntityKind, id: &str) -> RemoteResult<()>;

    /// Full snapshot of one kind.
    async fn fetch_all(&self, kind: EntityKind) -> RemoteResult<Vec<Entity>>;

    /// Push notifications, if this remote offers them.
    fn subscribe(&self) -> Option<Subscription> {
        None
    }
}
