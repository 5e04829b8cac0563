//! # Sync Configuration
//!
//! ```text
//! defaults ──► sync.toml ──► STOCKROOM_* env ──► validate() ──► SyncConfig
//!   (lowest)   (~/.config/stockroom/sync.toml)     (highest)
//! ```
//!
//! Recognised variables: `STOCKROOM_DEVICE_ID`, `STOCKROOM_DEVICE_NAME`,
//! `STOCKROOM_DB_PATH`, `STOCKROOM_REMOTE_URL`, `STOCKROOM_SYNC_MODE`,
//! `STOCKROOM_SYNC_INTERVAL_SECS`, `STOCKROOM_MAX_RETRIES`.
//!
//! ## File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Stockroom tablet"
//!
//! [database]
//! path = "/var/lib/stockroom/stockroom.db"
//!
//! [sync]
//! mode = "auto"                  # auto | manual | offline
//! max_retries = 3
//! base_backoff_ms = 1000
//! sync_interval_secs = 900
//! initial_delay_secs = 60
//! request_timeout_secs = 30
//! max_concurrent_partitions = 1
//! dead_letter_rejected = true
//!
//! [remote]
//! base_url = "https://inventory.example.org/api/"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Sync Mode
// =============================================================================

/// How the engine decides when to drain.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        Sync Mode Behavior                               │
/// │                                                                         │
/// │  AUTO (Default)                                                        │
/// │  • Drains after local mutations, on reconnect and on the timer         │
/// │  • Ingests remote pushes (or polls on the timer)                       │
/// │                                                                         │
/// │  MANUAL                                                                │
/// │  • Drains only on trigger_sync()                                       │
/// │  • Still ingests remote pushes                                         │
/// │                                                                         │
/// │  OFFLINE                                                               │
/// │  • No remote calls at all; every drain reports OFFLINE                 │
/// │  • Local mutations keep queueing                                       │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Auto,
    Manual,
    Offline,
}

impl SyncMode {
    /// Returns true if any remote traffic is allowed.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the engine drains on its own.
    pub fn drains_automatically(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4). Generated if not provided.
    #[serde(default = "default_device_id")]
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_device_name() -> String {
    "Stockroom Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: default_device_id(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `stockroom.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Drain and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Attempts per operation within one drain (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff; the k-th retry waits base * 2^k.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Period of the background drain timer (seconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Delay before the first timer tick (seconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Bound on each remote call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Entities drained in parallel. 1 keeps strict enqueue order.
    #[serde(default = "default_max_concurrent_partitions")]
    pub max_concurrent_partitions: usize,

    /// Move operations the remote permanently rejects to the dead-letter list.
    /// When false they stay queued and are retried every drain.
    #[serde(default = "default_true")]
    pub dead_letter_rejected: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    1000
}

fn default_sync_interval() -> u64 {
    15 * 60
}

fn default_initial_delay() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent_partitions() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            sync_interval_secs: default_sync_interval(),
            initial_delay_secs: default_initial_delay(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_partitions: default_max_concurrent_partitions(),
            dead_letter_rejected: default_true(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the REST sync API (`{base}/sync/items` etc.).
    #[serde(default)]
    pub base_url: Option<String>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub remote: RemoteSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overlaid by `sync.toml` (the given path, else the platform
    /// config dir; a missing file is fine), overlaid by `STOCKROOM_*`
    /// variables, then validated.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let path = config_path.or_else(Self::default_config_path);
        let mut config = match path.as_deref().filter(|p| p.is_file()) {
            Some(file) => {
                let config = Self::from_toml(&std::fs::read_to_string(file)?)?;
                info!(path = %file.display(), "Sync config read");
                config
            }
            None => {
                debug!(?path, "No sync config file, starting from defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// [`load`](Self::load), or plain defaults if that fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!(error = %e, "Sync config unusable, using defaults");
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Writes the config as TOML, creating parent directories.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let Some(path) = config_path.or_else(Self::default_config_path) else {
            return Err(SyncError::ConfigSaveFailed(
                "no config directory on this platform".into(),
            ));
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;

        info!(path = %path.display(), "Sync config written");
        Ok(())
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if let Some(raw) = self.remote.base_url.as_deref() {
            let scheme = url::Url::parse(raw)?.scheme().to_string();
            if scheme != "http" && scheme != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "{raw}: scheme must be http or https, not {scheme}"
                )));
            }
        }

        let positive = [
            ("max_retries", u64::from(self.sync.max_retries)),
            (
                "max_concurrent_partitions",
                self.sync.max_concurrent_partitions as u64,
            ),
            ("sync_interval_secs", self.sync.sync_interval_secs),
            ("request_timeout_secs", self.sync.request_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SyncError::InvalidConfig(format!("{name} must be at least 1")));
        }

        Ok(())
    }

    /// Applies `STOCKROOM_*` overrides read through `lookup`. Unparseable
    /// values are logged and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Option<T> {
            let value = raw.parse().ok();
            if value.is_none() {
                warn!(key, value = %raw, "Ignoring unparseable override");
            }
            value
        }

        if let Some(id) = lookup("STOCKROOM_DEVICE_ID") {
            self.device.id = id;
        }
        if let Some(name) = lookup("STOCKROOM_DEVICE_NAME") {
            self.device.name = name;
        }
        if let Some(path) = lookup("STOCKROOM_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("STOCKROOM_REMOTE_URL") {
            self.remote.base_url = Some(url);
        }
        if let Some(mode) = lookup("STOCKROOM_SYNC_MODE").and_then(|v| parsed("STOCKROOM_SYNC_MODE", v)) {
            self.sync.mode = mode;
        }
        if let Some(secs) =
            lookup("STOCKROOM_SYNC_INTERVAL_SECS").and_then(|v| parsed("STOCKROOM_SYNC_INTERVAL_SECS", v))
        {
            self.sync.sync_interval_secs = secs;
        }
        if let Some(retries) =
            lookup("STOCKROOM_MAX_RETRIES").and_then(|v| parsed("STOCKROOM_MAX_RETRIES", v))
        {
            self.sync.max_retries = retries;
        }
        debug!(device_id = %self.device.id, mode = %self.sync.mode, "Overrides applied");
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("org", "stockroom", "stockroom")
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote.base_url.as_deref()
    }

    /// Database file, falling back to the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("stockroom.db"))
                .unwrap_or_else(|| PathBuf::from("stockroom.db"))
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sync.max_retries,
            Duration::from_millis(self.sync.base_backoff_ms),
        )
        .retry_rejections(!self.sync.dead_letter_rejected)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.sync_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.sync.initial_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("MANUAL".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("primary".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.mode(), SyncMode::Auto);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync_interval(), Duration::from_secs(900));
        assert_eq!(config.initial_delay(), Duration::from_secs(60));
        assert_eq!(config.sync.max_concurrent_partitions, 1);
        assert!(config.sync.dead_letter_rejected);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "tablet-1".to_string();
        config.remote.base_url = Some("ws://inventory.local".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.base_url = Some("not a url".to_string());
        assert!(config.validate().unwrap_err().is_config_error());

        config.remote.base_url = Some("https://inventory.local/api/".to_string());
        assert!(config.validate().is_ok());

        config.sync.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SyncConfig::from_toml(
            r#"
            [sync]
            mode = "manual"
            base_backoff_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.mode(), SyncMode::Manual);
        assert_eq!(config.sync.base_backoff_ms, 10);
        assert_eq!(config.sync.max_retries, 3);
        assert!(!config.device.id.is_empty());
        assert!(config.remote_url().is_none());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("STOCKROOM_SYNC_MODE", "offline"),
            ("STOCKROOM_REMOTE_URL", "http://10.0.0.2:8080"),
            ("STOCKROOM_MAX_RETRIES", "5"),
            ("STOCKROOM_DB_PATH", "/tmp/stockroom.db"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mode(), SyncMode::Offline);
        assert_eq!(config.remote_url(), Some("http://10.0.0.2:8080"));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/stockroom.db"));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Front desk".to_string();
        config.sync.mode = SyncMode::Manual;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[device]"));
        assert!(contents.contains("[sync]"));

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.device.name, "Front desk");
        assert_eq!(loaded.mode(), SyncMode::Manual);
    }
}
