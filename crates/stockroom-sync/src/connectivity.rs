//! # Connectivity Signal
//!
//! A shared "is the remote reachable" flag fed by the platform (network
//! callbacks, a health probe, a test) and observed by the engine.
//!
//! ```text
//!   platform ──set_connected(bool)──► watch<bool> ──► engine
//!                                                   ├── is_connected() before each op
//!                                                   └── false → true  ⇒ request a drain
//! ```

use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Reachability as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl From<bool> for ConnectionState {
    fn from(connected: bool) -> Self {
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Cloneable handle to the connectivity flag. All clones share one value.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        ConnectivitySignal { tx }
    }

    pub fn connected() -> Self {
        Self::new(true)
    }

    pub fn disconnected() -> Self {
        Self::new(false)
    }

    /// Reports reachability. Subscribers are only woken on change.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });

        if changed {
            info!(state = %ConnectionState::from(connected), "Connectivity changed");
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.is_connected().into()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::connected()
    }
}
