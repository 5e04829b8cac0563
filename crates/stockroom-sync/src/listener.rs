//! # Status Listeners
//!
//! Fan-out of [`SyncStatus`] transitions.
//!
//! ```text
//!   engine ──publish(status)──► StatusBroadcaster
//!                                 ├── watch::Sender<SyncStatus>   (status_receiver())
//!                                 └── listeners (registration order)
//!                                       ├── #1 on_status(status)
//!                                       └── #2 on_status(status)
//! ```
//!
//! Listeners run synchronously on the publishing task; they should return
//! quickly. A panicking listener is not caught.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stockroom_core::SyncStatus;
use tokio::sync::watch;
use tracing::debug;

// =============================================================================
// Listener Trait
// =============================================================================

/// Receives every sync status transition.
pub trait SyncStatusListener: Send + Sync {
    fn on_status(&self, status: SyncStatus);
}

impl<F> SyncStatusListener for F
where
    F: Fn(SyncStatus) + Send + Sync,
{
    fn on_status(&self, status: SyncStatus) {
        self(status)
    }
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

pub struct StatusBroadcaster {
    tx: watch::Sender<SyncStatus>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn SyncStatusListener>)>>,
    next_id: AtomicU64,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::Idle);
        StatusBroadcaster {
            tx,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: Arc<dyn SyncStatusListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, listener));
        debug!(%id, "Sync status listener registered");
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        before != listeners.len()
    }

    /// Records `status` and notifies every listener.
    pub fn publish(&self, status: SyncStatus) {
        self.tx.send_replace(status);

        // Snapshot so listeners may (un)register from inside a callback.
        let listeners: Vec<_> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener.on_status(status);
        }
    }

    pub fn current(&self) -> SyncStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Arc<dyn SyncStatusListener>)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
