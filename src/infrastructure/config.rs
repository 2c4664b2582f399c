//! Configuration infrastructure
//!
//! Settings live in a single JSON file under the platform config directory.
//! Missing sections and fields fall back to [`defaults`], so older files keep
//! loading after new settings are introduced.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine behaviour
    pub sync: SyncConfig,

    /// Element names of the supplier feed
    pub feed: FeedSchema,

    pub logging: LoggingConfig,

    pub database: DatabaseConfig,

    /// Application-managed settings (auto-updated)
    pub app_managed: AppManagedConfig,
}

/// Sync engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Feed records per batch
    pub batch_size: usize,

    /// Pause after each committed batch; 0 disables throttling
    pub batch_delay_ms: u64,

    /// Leave records whose stock status is "instock" untouched
    pub ignore_in_stock: bool,

    /// Upper bound on identity index entries
    pub identity_cache_cap: usize,

    /// Maximum ids per bulk attribute read
    pub attribute_chunk_size: usize,

    pub validation_max_attempts: u32,
    pub validation_retry_delay_secs: u64,
    /// Feed must hold at least this share of published records
    pub validation_min_ratio: f64,
    /// Ratio check only applies above this many published records
    pub validation_min_published: u64,

    /// Execution budget per invocation; 0 disables time-boxing
    pub max_execution_secs: u64,
    /// Time kept in reserve before the hard limit
    pub safety_buffer_secs: u64,
    /// Records whose predicted cost must fit in the remaining budget
    pub lookahead_records: u32,
    /// Continue in-process after a timeout instead of reporting a resume point
    pub auto_resume: bool,

    /// Absolute price difference treated as equal; 0 compares exactly
    pub price_tolerance: f64,

    /// Actor used when none is given on the command line
    pub default_actor_id: i64,

    /// Runs left in "running" longer than this are reclaimed as failed
    pub stale_run_minutes: u64,
}

impl SyncConfig {
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub const fn validation_retry_delay(&self) -> Duration {
        Duration::from_secs(self.validation_retry_delay_secs)
    }

    pub const fn max_execution(&self) -> Option<Duration> {
        if self.max_execution_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_execution_secs))
        }
    }

    pub const fn safety_buffer(&self) -> Duration {
        Duration::from_secs(self.safety_buffer_secs)
    }
}

/// Names of the repeating record element and its child fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSchema {
    pub record_element: String,
    pub id_field: String,
    pub price_field: String,
    pub quantity_field: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL; empty means the default file in the data directory
    pub url: String,
    pub max_connections: u32,
}

/// Application-managed settings that are automatically updated by the app
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppManagedConfig {
    /// Timestamp of the last completed sync
    pub last_successful_sync: Option<String>,

    /// Configuration version for migration purposes
    pub config_version: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
            ignore_in_stock: false,
            identity_cache_cap: defaults::IDENTITY_CACHE_CAP,
            attribute_chunk_size: defaults::ATTRIBUTE_CHUNK_SIZE,
            validation_max_attempts: defaults::VALIDATION_MAX_ATTEMPTS,
            validation_retry_delay_secs: defaults::VALIDATION_RETRY_DELAY_SECS,
            validation_min_ratio: defaults::VALIDATION_MIN_RATIO,
            validation_min_published: defaults::VALIDATION_MIN_PUBLISHED,
            max_execution_secs: 0,
            safety_buffer_secs: defaults::SAFETY_BUFFER_SECS,
            lookahead_records: defaults::LOOKAHEAD_RECORDS,
            auto_resume: false,
            price_tolerance: 0.0,
            default_actor_id: defaults::DEFAULT_ACTOR_ID,
            stale_run_minutes: defaults::STALE_RUN_MINUTES,
        }
    }
}

impl Default for FeedSchema {
    fn default() -> Self {
        Self {
            record_element: defaults::FEED_RECORD_ELEMENT.to_string(),
            id_field: defaults::FEED_ID_FIELD.to_string(),
            price_field: defaults::FEED_PRICE_FIELD.to_string(),
            quantity_field: defaults::FEED_QUANTITY_FIELD.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let module_filters = [("sqlx", "warn"), ("tokio", "info"), ("catalog_feed_sync", "info")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for AppManagedConfig {
    fn default() -> Self {
        Self {
            last_successful_sync: None,
            config_version: defaults::CONFIG_VERSION,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(config_dir)
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(data_dir)
    }

    /// Configuration manager for the platform default location
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    /// Configuration manager for an explicit file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Default database URL inside the application data directory
    pub fn default_database_url() -> Result<String> {
        let db_path = Self::get_app_data_dir()?.join("database").join(defaults::DB_FILE_NAME);
        Ok(format!("sqlite:{}", db_path.display()))
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("🎉 Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(mut config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                self.migrate_config_if_needed(&mut config).await?;
                Ok(config)
            }
            Err(parse_error) => {
                warn!("⚠️  Configuration file unreadable: {}", parse_error);

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                info!("✅ Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Update sync settings in place
    pub async fn update_sync_config<F>(&self, updater: F) -> Result<SyncConfig>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let mut config = self.load_config().await?;
        updater(&mut config.sync);
        self.save_config(&config).await?;
        Ok(config.sync)
    }

    /// Update app-managed settings (like the last successful sync)
    pub async fn update_app_managed<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut AppManagedConfig),
    {
        let mut config = self.load_config().await?;
        updater(&mut config.app_managed);
        self.save_config(&config).await
    }

    /// Migrate configuration from older versions
    pub async fn migrate_config_if_needed(&self, config: &mut AppConfig) -> Result<bool> {
        if config.app_managed.config_version >= defaults::CONFIG_VERSION {
            return Ok(false);
        }

        info!(
            "🔄 Migrating configuration from version {} to {}",
            config.app_managed.config_version,
            defaults::CONFIG_VERSION
        );
        // Version 0 files predate the tolerance setting and stored the batch
        // pause in seconds.
        if config.app_managed.config_version == 0 && config.sync.batch_delay_ms < 10 {
            config.sync.batch_delay_ms = defaults::BATCH_DELAY_MS;
        }
        config.app_managed.config_version = defaults::CONFIG_VERSION;
        self.save_config(config).await?;
        Ok(true)
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "catalog-feed-sync";
    pub const CONFIG_FILE_NAME: &str = "catalog_feed_sync_config.json";
    pub const DB_FILE_NAME: &str = "catalog.db";
    pub const CONFIG_VERSION: u32 = 1;

    /// Feed records per batch
    pub const BATCH_SIZE: usize = 25;
    /// Pause between batches in milliseconds
    pub const BATCH_DELAY_MS: u64 = 100;
    pub const IDENTITY_CACHE_CAP: usize = 100_000;
    pub const ATTRIBUTE_CHUNK_SIZE: usize = 50;

    pub const VALIDATION_MAX_ATTEMPTS: u32 = 3;
    pub const VALIDATION_RETRY_DELAY_SECS: u64 = 30;
    pub const VALIDATION_MIN_RATIO: f64 = 0.5;
    pub const VALIDATION_MIN_PUBLISHED: u64 = 100;

    pub const SAFETY_BUFFER_SECS: u64 = 10;
    pub const LOOKAHEAD_RECORDS: u32 = 25;

    pub const DEFAULT_ACTOR_ID: i64 = 1;
    pub const STALE_RUN_MINUTES: u64 = 5;

    pub const FEED_RECORD_ELEMENT: &str = "product";
    pub const FEED_ID_FIELD: &str = "SKU";
    pub const FEED_PRICE_FIELD: &str = "supplier_price";
    pub const FEED_QUANTITY_FIELD: &str = "quantity";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 7;

    pub const DB_MAX_CONNECTIONS: u32 = 5;
}
