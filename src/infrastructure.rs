//! Infrastructure layer for configuration, logging, persistence and feed input
//!
//! SQLite-backed implementations of the domain store ports, the streaming
//! feed reader and the process-level plumbing.

pub mod catalog_repository;
pub mod config;
pub mod database_connection;
pub mod feed_reader;
pub mod logging;
pub mod sync_log_repository;

// Re-export commonly used items
pub use catalog_repository::SqliteCatalogStore;
pub use config::{AppConfig, ConfigManager, FeedSchema, SyncConfig};
pub use database_connection::DatabaseConnection;
pub use feed_reader::{FeedReader, count_records};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use sync_log_repository::SqliteSyncLogStore;
