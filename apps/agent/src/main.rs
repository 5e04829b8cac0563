//! # Stockroom Agent
//!
//! Long-running process that keeps the local cache and the remote store in
//! sync.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Stockroom Agent                                │
//! │                                                                         │
//! │  SyncConfig ──► Database ──► SyncEngine::start ──► wait for signal      │
//! │                                   │                        │            │
//! │                    RestRemote or InMemoryRemote             ▼            │
//! │                                                   engine.shutdown()     │
//! │                                                   db.close()            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//! 1. Initialize tracing (`RUST_LOG` overrides the default filter)
//! 2. Load `sync.toml` (path from the first argument, else the project
//!    config dir), falling back to defaults
//! 3. Open the database and run migrations
//! 4. Pick the remote: REST when `remote_url` is set, otherwise an in-process
//!    store (local-only development)
//! 5. Start the engine and log every status change
//! 6. Drain once more on shutdown so queued work is not left behind

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use stockroom_core::SyncStatus;
use stockroom_db::{Database, DbConfig};
use stockroom_sync::{
    ConnectivitySignal, InMemoryRemote, RemoteAdapter, RestRemote, SyncConfig, SyncEngine,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match SyncConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Falling back to default configuration");
            SyncConfig::load_or_default(None)
        }
    };
    info!(
        device = config.device_id(),
        mode = %config.mode(),
        remote = config.remote_url().unwrap_or("<none>"),
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.database_path())).await?;
    info!(path = %config.database_path().display(), "Database ready");

    let remote: Arc<dyn RemoteAdapter> = match config.remote_url() {
        Some(_) => Arc::new(RestRemote::from_config(&config)?),
        None => {
            warn!("No remote_url configured, syncing against an in-process store");
            Arc::new(InMemoryRemote::new())
        }
    };

    let engine = SyncEngine::new(
        db.clone(),
        remote,
        ConnectivitySignal::connected(),
        config,
    );
    engine.add_sync_listener(|status: SyncStatus| match status {
        SyncStatus::Failed | SyncStatus::Partial => warn!(%status, "Sync status"),
        _ => info!(%status, "Sync status"),
    });
    engine.start()?;
    info!(pending = engine.pending_count().await?, "Sync engine started");

    shutdown_signal().await;

    let report = engine.trigger_sync().await;
    info!(
        status = %report.status,
        succeeded = report.succeeded,
        failed = report.failed,
        "Final drain"
    );

    engine.shutdown().await;
    db.close().await;
    info!("Agent stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
