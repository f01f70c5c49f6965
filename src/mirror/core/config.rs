//! Configuration for the conversation mirror.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mirror::core::errors::{MirrorError, MirrorResult};

/// Directory under the home directory holding config and data.
pub const APP_DIR_NAME: &str = ".fastintercom";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Datastore settings.
    pub storage: StorageConfig,
    /// Search limits.
    pub search: SearchConfig,
    /// Sync tracking settings.
    pub sync: SyncConfig,
    /// Settings for the external Intercom client.
    pub remote: RemoteConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl MirrorConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> MirrorResult<()> {
        if self.storage.pool_size == 0 {
            return Err(MirrorError::InvalidConfig(
                "storage.pool_size must be > 0".to_string(),
            ));
        }

        if self.storage.acquire_timeout_ms == 0 {
            return Err(MirrorError::InvalidConfig(
                "storage.acquire_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.search.max_limit == 0 {
            return Err(MirrorError::InvalidConfig(
                "search.max_limit must be > 0".to_string(),
            ));
        }

        if self.search.default_limit > self.search.max_limit {
            return Err(MirrorError::InvalidConfig(
                "search.default_limit must not exceed search.max_limit".to_string(),
            ));
        }

        if self.sync.merge_retry_attempts == 0 {
            return Err(MirrorError::InvalidConfig(
                "sync.merge_retry_attempts must be > 0".to_string(),
            ));
        }

        if self.sync.background.interval_seconds == 0 {
            return Err(MirrorError::InvalidConfig(
                "sync.background.interval_seconds must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default config file location (`~/.fastintercom/config.json`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        app_dir().join("config.json")
    }

    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> MirrorResult<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            debug!(path = %path.display(), "No config file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> MirrorResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `FASTINTERCOM_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns an error if a numeric override does not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> MirrorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FASTINTERCOM_DB_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("FASTINTERCOM_POOL_SIZE") {
            self.storage.pool_size = size.trim().parse().map_err(|_| {
                MirrorError::InvalidConfig(format!("FASTINTERCOM_POOL_SIZE is not a number: {size}"))
            })?;
        }
        if let Some(token) = lookup("FASTINTERCOM_INTERCOM_TOKEN") {
            self.remote.access_token = Some(token);
        }
        if let Some(port) = lookup("FASTINTERCOM_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                MirrorError::InvalidConfig(format!("FASTINTERCOM_PORT is not a port: {port}"))
            })?;
        }
        Ok(())
    }
}

/// `~/.fastintercom`, falling back to the working directory without a home.
#[must_use]
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Datastore settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub database_path: PathBuf,
    /// Number of pooled connections.
    pub pool_size: usize,
    /// Maximum wait for a pooled connection, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: app_dir().join("data.db"),
            pool_size: 5,
            acquire_timeout_ms: 15_000,
        }
    }
}

/// Search limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Limit used when a filter does not set one.
    pub default_limit: usize,
    /// Hard ceiling regardless of the requested limit.
    pub max_limit: usize,
    /// Limit used by the `search_conversations` tool.
    pub tool_default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 500,
            tool_default_limit: 50,
        }
    }
}

/// Sync tracking settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts for a sync-period merge before giving up.
    pub merge_retry_attempts: u32,
    /// Base backoff between merge attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Number of recent sync periods reported by status.
    pub recent_history: usize,
    /// Periodic background sync.
    pub background: BackgroundSyncConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            merge_retry_attempts: 3,
            retry_backoff_ms: 25,
            recent_history: 10,
            background: BackgroundSyncConfig::default(),
        }
    }
}

/// Periodic background sync settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSyncConfig {
    /// Whether the worker runs at all.
    pub enabled: bool,
    /// Seconds between checks.
    pub interval_seconds: u64,
    /// Trailing window kept fresh, in hours.
    pub lookback_hours: u32,
    /// Maximum age of the newest sync before the window counts as stale.
    pub max_age_seconds: u64,
}

impl Default for BackgroundSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 900,
            lookback_hours: 24,
            max_age_seconds: 300,
        }
    }
}

/// Settings for the external Intercom client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Intercom access token.
    pub access_token: Option<String>,
    /// Request timeout for remote calls.
    pub api_timeout_seconds: u64,
    /// Days of history for the first sync (0 means all history).
    pub initial_sync_days: u32,
    /// Intercom workspace id used to build inbox links.
    pub app_id: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            api_timeout_seconds: 300,
            initial_sync_days: 7,
            app_id: None,
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address.
    pub host: IpAddr,
    /// Listening port.
    pub port: u16,
}

impl ServerConfig {
    /// Socket address the HTTP server binds to.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
        }
    }
}
