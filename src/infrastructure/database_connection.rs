// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true);

        // Every connection to :memory: is its own database, so pin the pool to one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'publish',
                stock_status TEXT NOT NULL DEFAULT 'instock',
                manage_stock INTEGER NOT NULL DEFAULT 0,
                backorders TEXT NOT NULL DEFAULT 'no',
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        ";

        // meta_value is untyped so flags keep whichever encoding was written
        let create_product_meta_sql = r"
            CREATE TABLE IF NOT EXISTS product_meta (
                product_id INTEGER NOT NULL,
                meta_key TEXT NOT NULL,
                meta_value,
                PRIMARY KEY (product_id, meta_key),
                FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
            )
        ";

        let create_actors_sql = r"
            CREATE TABLE IF NOT EXISTS actors (
                id INTEGER PRIMARY KEY,
                login TEXT NOT NULL
            )
        ";

        let create_transients_sql = r"
            CREATE TABLE IF NOT EXISTS catalog_transients (
                cache_key TEXT PRIMARY KEY,
                cache_value TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        ";

        let create_sync_logs_sql = r"
            CREATE TABLE IF NOT EXISTS sync_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                feed_path TEXT NOT NULL,
                feed_record_count INTEGER,
                status TEXT NOT NULL DEFAULT 'running',
                products_processed INTEGER NOT NULL DEFAULT 0,
                products_updated INTEGER NOT NULL DEFAULT 0,
                products_unchanged INTEGER NOT NULL DEFAULT 0,
                products_skipped INTEGER NOT NULL DEFAULT 0,
                products_skipped_instock INTEGER NOT NULL DEFAULT 0,
                products_locked INTEGER NOT NULL DEFAULT 0,
                products_not_found INTEGER NOT NULL DEFAULT 0,
                products_errors INTEGER NOT NULL DEFAULT 0,
                execution_time REAL NOT NULL DEFAULT 0,
                error_message TEXT,
                batch_size INTEGER NOT NULL,
                offset_start INTEGER NOT NULL DEFAULT 0,
                offset_end INTEGER,
                actor_id INTEGER NOT NULL,
                dry_run INTEGER NOT NULL DEFAULT 0
            )
        ";

        let create_history_sql = r"
            CREATE TABLE IF NOT EXISTS product_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                sync_log_id INTEGER NOT NULL,
                external_id TEXT NOT NULL,
                field_changed TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                recorded_at TEXT NOT NULL
            )
        ";

        let create_indexes_sql = r"
            CREATE INDEX IF NOT EXISTS idx_product_meta_key_value ON product_meta (meta_key, meta_value);
            CREATE INDEX IF NOT EXISTS idx_products_status ON products (status);
            CREATE INDEX IF NOT EXISTS idx_sync_logs_started_at ON sync_logs (started_at);
            CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs (status);
            CREATE INDEX IF NOT EXISTS idx_history_product_id ON product_history (product_id);
            CREATE INDEX IF NOT EXISTS idx_history_sync_log_id ON product_history (sync_log_id);
        ";

        for sql in [
            create_products_sql,
            create_product_meta_sql,
            create_actors_sql,
            create_transients_sql,
            create_sync_logs_sql,
            create_history_sql,
            create_indexes_sql,
        ] {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration_is_idempotent() -> Result<()> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        db.migrate().await?;

        for table in ["products", "product_meta", "actors", "catalog_transients", "sync_logs", "product_history"] {
            let found = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
            assert!(found.is_some(), "missing table {table}");
        }
        Ok(())
    }
}
