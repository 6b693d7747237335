//! Application configuration management.
//!
//! Static deployment settings (pusher endpoint, restart window, storage and
//! logging locations) are persisted as TOML on disk. User-facing toggles such
//! as "allow notifications" are not here: they live in the key-value store so
//! they can change at runtime and survive process death alongside the
//! registration state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{VxError, VxResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Push provider and pusher registration settings.
    #[serde(default)]
    pub push: PushConfig,

    /// Event stream service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Defaults for the background sync preferences.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Push provider and pusher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether a platform push provider is available at all. When false the
    /// service falls back to background sync with a sticky notification.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pusher `app_id`.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Pusher `app_display_name`.
    #[serde(default = "default_app_name")]
    pub app_display_name: String,

    /// Pusher `device_display_name`. Empty means "use the host name".
    #[serde(default)]
    pub device_display_name: String,

    /// Pusher `lang`.
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Push gateway URL placed in the pusher `data.url`.
    #[serde(default = "default_pusher_url")]
    pub pusher_url: String,

    /// Delay before automatically retrying a failed server registration.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Home-server request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Event stream service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Lower bound of the randomized self-restart delay.
    #[serde(default = "default_restart_min")]
    pub restart_min_delay_ms: u64,

    /// Upper bound of the randomized self-restart delay.
    #[serde(default = "default_restart_max")]
    pub restart_max_delay_ms: u64,

    /// Capacity of the application event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

/// Defaults seeded into the sync preferences on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Long-poll timeout in milliseconds.
    #[serde(default = "default_sync_timeout")]
    pub timeout_ms: i64,

    /// Delay between two polls in milliseconds.
    #[serde(default = "default_sync_delay")]
    pub delay_ms: i64,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. If empty, uses the default location.
    #[serde(default)]
    pub path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Run integrity check on startup.
    #[serde(default = "default_true")]
    pub integrity_check_on_startup: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive: trace, debug, info, warn, error, or an EnvFilter string.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses the default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output in the log file.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_app_id() -> String {
    constants::DEFAULT_PUSHER_APP_ID.to_string()
}

fn default_app_name() -> String {
    constants::APP_NAME.to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_pusher_url() -> String {
    constants::DEFAULT_PUSHER_URL.to_string()
}

fn default_retry_delay_ms() -> u64 {
    constants::SERVER_RETRY_DELAY_SECS * 1000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_restart_min() -> u64 {
    constants::RESTART_MIN_DELAY_MS
}

fn default_restart_max() -> u64 {
    constants::RESTART_MAX_DELAY_MS
}

fn default_event_bus_capacity() -> usize {
    256
}

fn default_sync_timeout() -> i64 {
    constants::DEFAULT_SYNC_TIMEOUT_MS
}

fn default_sync_delay() -> i64 {
    constants::DEFAULT_SYNC_DELAY_MS
}

fn default_pool_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: default_app_id(),
            app_display_name: default_app_name(),
            device_display_name: String::new(),
            lang: default_lang(),
            pusher_url: default_pusher_url(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PushConfig {
    /// Retry delay as a Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Device display name, falling back to the host name.
    pub fn effective_device_name(&self) -> String {
        if self.device_display_name.trim().is_empty() {
            Platform::device_display_name()
        } else {
            self.device_display_name.clone()
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            restart_min_delay_ms: default_restart_min(),
            restart_max_delay_ms: default_restart_max(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_sync_timeout(),
            delay_ms: default_sync_delay(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            wal_mode: true,
            pool_size: default_pool_size(),
            integrity_check_on_startup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path, or defaults
    /// when no file exists yet.
    pub fn load_default() -> VxResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> VxResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> VxResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> VxResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| VxError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject configurations the services cannot run with.
    pub fn validate(&self) -> VxResult<()> {
        if self.service.restart_min_delay_ms > self.service.restart_max_delay_ms {
            return Err(VxError::Config(format!(
                "service.restart_min_delay_ms ({}) exceeds restart_max_delay_ms ({})",
                self.service.restart_min_delay_ms, self.service.restart_max_delay_ms
            )));
        }
        if self.push.enabled && self.push.pusher_url.trim().is_empty() {
            return Err(VxError::MissingConfig("push.pusher_url".into()));
        }
        if self.push.app_id.trim().is_empty() {
            return Err(VxError::MissingConfig("push.app_id".into()));
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> VxResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective database path, using the configured path or the default.
    pub fn effective_db_path(&self) -> VxResult<PathBuf> {
        if self.database.path.is_empty() {
            Ok(Platform::data_dir()?.join("vector-push.db"))
        } else {
            Ok(PathBuf::from(&self.database.path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> VxResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone out the push section.
    pub async fn push(&self) -> PushConfig {
        self.inner.read().await.push.clone()
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> VxResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}
