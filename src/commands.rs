//! Command-line commands
//!
//! Each subcommand lives in its own file under `commands/`. This module holds
//! the clap definitions and the [`AppContext`] every command runs against.

pub mod config_commands;
pub mod history_commands;
pub mod sync_commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::infrastructure::config::{AppConfig, ConfigManager};
use crate::infrastructure::logging::{get_log_directory, init_logging_with_config, log_system_info};
use crate::infrastructure::{DatabaseConnection, SqliteCatalogStore, SqliteSyncLogStore};

pub use config_commands::{SettingsArgs, show_settings};
pub use history_commands::{
    format_run_line, reclaim_stale, show_product_history, show_product_history_by_sku, show_runs, show_stats,
};
pub use sync_commands::{SyncArgs, clear_cache, format_outcome, run_sync};

#[derive(Parser, Debug)]
#[command(name = "catalog-feed-sync")]
#[command(about = "Synchronise catalog prices and availability from a supplier XML feed", long_about = None)]
pub struct Cli {
    /// Database URL, e.g. sqlite:/var/lib/catalog.db
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a feed sync
    Sync(SyncArgs),
    /// Drop derived catalog caches
    ClearCache,
    /// List recent sync runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the audit trail of one product
    History {
        product_id: i64,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show the audit trail of the product with this external id
    HistorySku {
        sku: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Aggregate statistics over recent runs
    Stats {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Mark runs stuck in `running` as failed
    ReclaimStale {
        /// Age threshold; defaults to the configured value
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Show or change sync settings
    Settings(SettingsArgs),
}

/// Configuration, database and stores shared by every command
pub struct AppContext {
    pub config_manager: ConfigManager,
    pub config: AppConfig,
    pub database: DatabaseConnection,
    pub catalog: Arc<SqliteCatalogStore>,
    pub sync_log: Arc<SqliteSyncLogStore>,
}

impl AppContext {
    /// Load configuration, start logging, connect and migrate the database
    pub async fn initialize(database_url: Option<String>, config_path: Option<PathBuf>) -> Result<Self> {
        let config_manager = match config_path {
            Some(path) => ConfigManager::with_path(path),
            None => ConfigManager::new()?,
        };
        let config = config_manager.load_config().await?;

        init_logging_with_config(&config.logging, Some(get_log_directory()))?;
        log_system_info();

        let url = match database_url {
            Some(url) => url,
            None if !config.database.url.is_empty() => config.database.url.clone(),
            None => ConfigManager::default_database_url()?,
        };
        let database = DatabaseConnection::with_max_connections(&url, config.database.max_connections)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;
        database.migrate().await?;

        let pool = database.pool().clone();
        Ok(Self {
            config_manager,
            config,
            catalog: Arc::new(SqliteCatalogStore::new(pool.clone())),
            sync_log: Arc::new(SqliteSyncLogStore::new(pool)),
            database,
        })
    }

    /// Context over an already migrated database, without touching logging
    pub fn from_parts(
        config_manager: ConfigManager,
        config: AppConfig,
        database: DatabaseConnection,
    ) -> Self {
        let pool = database.pool().clone();
        Self {
            config_manager,
            config,
            catalog: Arc::new(SqliteCatalogStore::new(pool.clone())),
            sync_log: Arc::new(SqliteSyncLogStore::new(pool)),
            database,
        }
    }
}

/// Dispatch a parsed command line
pub async fn execute(cli: Cli) -> Result<()> {
    let ctx = AppContext::initialize(cli.database, cli.config).await?;

    match cli.command {
        Commands::Sync(args) => {
            let outcome = run_sync(&ctx, args).await?;
            println!("{}", format_outcome(&outcome));
        }
        Commands::ClearCache => {
            let cleared = clear_cache(&ctx).await?;
            println!("Cleared {cleared} derived cache entries");
        }
        Commands::Runs { limit } => show_runs(&ctx, limit).await?,
        Commands::History { product_id, limit } => show_product_history(&ctx, product_id, limit).await?,
        Commands::HistorySku { sku, limit } => show_product_history_by_sku(&ctx, &sku, limit).await?,
        Commands::Stats { days } => show_stats(&ctx, days).await?,
        Commands::ReclaimStale { minutes } => {
            let reclaimed = reclaim_stale(&ctx, minutes).await?;
            println!("Reclaimed {reclaimed} stale runs");
        }
        Commands::Settings(args) => show_settings(&ctx, args).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_arguments_parse() {
        let cli = Cli::parse_from([
            "catalog-feed-sync",
            "--database",
            "sqlite::memory:",
            "sync",
            "feed.xml",
            "--batch-size",
            "50",
            "--offset",
            "250",
            "--dry-run",
            "--user",
            "390",
        ]);
        assert_eq!(cli.database.as_deref(), Some("sqlite::memory:"));
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.file, PathBuf::from("feed.xml"));
        assert_eq!(args.batch_size, Some(50));
        assert_eq!(args.offset, 250);
        assert!(args.dry_run);
        assert!(!args.skip_validation);
        assert_eq!(args.user, Some(390));
    }

    #[test]
    fn query_defaults() {
        let cli = Cli::parse_from(["catalog-feed-sync", "runs"]);
        assert!(matches!(cli.command, Commands::Runs { limit: 20 }));
        let cli = Cli::parse_from(["catalog-feed-sync", "stats"]);
        assert!(matches!(cli.command, Commands::Stats { days: 30 }));
        let cli = Cli::parse_from(["catalog-feed-sync", "settings", "--ignore-in-stock", "true"]);
        let Commands::Settings(args) = cli.command else {
            panic!("expected settings");
        };
        assert_eq!(args.ignore_in_stock, Some(true));
    }
}
