//! # Background Worker
//!
//! Tasks spawned by [`SyncEngine::start`](crate::SyncEngine::start).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  timer ─────────────── Timer ──────────────┐                           │
//! │  (initial_delay, then sync_interval)        │                           │
//! │                                             ▼                           │
//! │  connectivity watcher ─ ConnectivityRegained ─► mpsc(1) ──► drain worker │
//! │  (false → true)                             ▲            attempt_sync   │
//! │                                             │            + pull on      │
//! │  enqueue_mutation ──── Mutation ────────────┘              Timer when   │
//! │  request_sync ──────── Manual                              no push      │
//! │                                                                         │
//! │  subscription task: RemoteChange ──► ingest_remote                      │
//! │                                                                         │
//! │  shutdown: watch<bool> flips, every task exits its select! loop,        │
//! │  a drain in flight is cancelled                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timer and connectivity triggers are only installed in `auto` mode. The
//! subscription task only runs when sync is enabled and the remote pushes.

use std::time::Duration;

use stockroom_core::SyncStatus;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::drain::{attempt_sync, DrainTrigger};
use crate::engine::SyncEngine;
use crate::remote::Subscription;

pub(crate) struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(engine: SyncEngine, drain_rx: mpsc::Receiver<DrainTrigger>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mode = engine.config().mode();

        let subscription = if mode.is_sync_enabled() {
            engine.inner().remote.subscribe()
        } else {
            None
        };
        let pull_on_timer = subscription.is_none();

        let mut handles = vec![tokio::spawn(drain_worker(
            engine.clone(),
            drain_rx,
            pull_on_timer,
            shutdown_rx.clone(),
        ))];

        if mode.drains_automatically() {
            handles.push(tokio::spawn(timer(engine.clone(), shutdown_rx.clone())));
            handles.push(tokio::spawn(connectivity_watcher(
                engine.clone(),
                shutdown_rx.clone(),
            )));
        }

        if let Some(subscription) = subscription {
            handles.push(tokio::spawn(ingest_subscription(
                engine,
                subscription,
                shutdown_rx,
            )));
        }

        debug!(tasks = handles.len(), %mode, "Background tasks spawned");
        BackgroundTasks {
            shutdown_tx,
            handles,
        }
    }

    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

async fn drain_worker(
    engine: SyncEngine,
    mut drain_rx: mpsc::Receiver<DrainTrigger>,
    pull_on_timer: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            trigger = drain_rx.recv() => {
                let Some(trigger) = trigger else { break };
                debug!(%trigger, "Drain worker woke");

                // Shutdown cancels a drain in flight. Each store statement is
                // atomic, so whatever was not confirmed stays queued.
                let report = tokio::select! {
                    report = attempt_sync(engine.inner()) => report,
                    _ = shutdown_rx.changed() => {
                        info!(%trigger, "Drain cancelled by shutdown");
                        if engine.inner().status.current() == SyncStatus::InProgress {
                            engine.inner().status.publish(SyncStatus::Idle);
                        }
                        break;
                    }
                };
                debug!(%trigger, status = %report.status, "Drain worker pass done");

                if trigger == DrainTrigger::Timer && pull_on_timer && engine.inner().is_online() {
                    if let Err(e) = engine.pull_remote().await {
                        warn!(error = %e, "Periodic pull failed");
                    }
                }
            }
        }
    }
    debug!("Drain worker stopped");
}

async fn timer(engine: SyncEngine, mut shutdown_rx: watch::Receiver<bool>) {
    let config = engine.config();
    let start = Instant::now() + config.initial_delay();
    let period = config.sync_interval().max(Duration::from_millis(1));
    let mut ticks = interval_at(start, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticks.tick() => engine.inner().request_drain(DrainTrigger::Timer),
        }
    }
    debug!("Sync timer stopped");
}

async fn connectivity_watcher(engine: SyncEngine, mut shutdown_rx: watch::Receiver<bool>) {
    let mut rx = engine.connectivity().subscribe();
    let mut was_connected = *rx.borrow_and_update();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *rx.borrow_and_update();
                if connected && !was_connected {
                    info!("Connectivity regained, requesting drain");
                    engine.inner().request_drain(DrainTrigger::ConnectivityRegained);
                }
                was_connected = connected;
            }
        }
    }
    debug!("Connectivity watcher stopped");
}

async fn ingest_subscription(
    engine: SyncEngine,
    mut subscription: Subscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            change = subscription.next() => {
                let Some(change) = change else {
                    info!("Remote subscription closed");
                    break;
                };
                let count = change.entities.len();
                match engine.ingest_remote(change.kind, change.entities).await {
                    Ok(report) => debug!(kind = %change.kind, count, written = report.written(), "Pushed changes ingested"),
                    Err(e) => warn!(kind = %change.kind, error = %e, "Failed to ingest pushed changes"),
                }
            }
        }
    }
    debug!("Subscription task stopped");
}
