//! SQLite implementation of the run log and product audit trail

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::warn;

use crate::domain::catalog::ProductId;
use crate::domain::repositories::SyncLogStore;
use crate::domain::stats::BatchStats;
use crate::domain::sync_run::{
    NewHistoryEntry, NewSyncRun, ProductHistoryEntry, RunCompletion, SyncRun, SyncRunStatus,
    SyncStatsSummary,
};

/// Message stored on runs reclaimed by the janitor
pub const STALE_RUN_MESSAGE: &str = "Sync interrupted - timed out or terminated unexpectedly";

/// SQLite caps bound parameters per statement; 7 per history row
const HISTORY_ROWS_PER_INSERT: usize = 100;

#[derive(Clone)]
pub struct SqliteSyncLogStore {
    pool: Arc<SqlitePool>,
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp {raw}"))?
        .with_timezone(&Utc))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl SqliteSyncLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    fn map_run(row: &SqliteRow) -> Result<SyncRun> {
        let status: String = row.try_get("status")?;
        let started_at: String = row.try_get("started_at")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;

        Ok(SyncRun {
            id: row.try_get("id")?,
            started_at: parse_timestamp(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
            feed_path: row.try_get("feed_path")?,
            feed_record_count: row.try_get::<Option<i64>, _>("feed_record_count")?.map(to_u64),
            status: SyncRunStatus::parse(&status)
                .with_context(|| format!("Unknown run status {status}"))?,
            stats: BatchStats {
                processed: to_u64(row.try_get("products_processed")?),
                updated: to_u64(row.try_get("products_updated")?),
                unchanged: to_u64(row.try_get("products_unchanged")?),
                skipped: to_u64(row.try_get("products_skipped")?),
                skipped_in_stock: to_u64(row.try_get("products_skipped_instock")?),
                locked: to_u64(row.try_get("products_locked")?),
                errors: to_u64(row.try_get("products_errors")?),
                not_found: to_u64(row.try_get("products_not_found")?),
            },
            execution_time_secs: row.try_get("execution_time")?,
            error_message: row.try_get("error_message")?,
            batch_size: to_u64(row.try_get("batch_size")?),
            offset_start: to_u64(row.try_get("offset_start")?),
            offset_end: row.try_get::<Option<i64>, _>("offset_end")?.map(to_u64),
            actor_id: row.try_get("actor_id")?,
            dry_run: row.try_get::<i64, _>("dry_run")? != 0,
        })
    }

    fn map_history(row: &SqliteRow) -> Result<ProductHistoryEntry> {
        let recorded_at: String = row.try_get("recorded_at")?;
        Ok(ProductHistoryEntry {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            run_id: row.try_get("sync_log_id")?,
            external_id: row.try_get("external_id")?,
            field: row.try_get("field_changed")?,
            old_value: row.try_get::<Option<String>, _>("old_value")?.unwrap_or_default(),
            new_value: row.try_get::<Option<String>, _>("new_value")?.unwrap_or_default(),
            recorded_at: parse_timestamp(&recorded_at)?,
        })
    }

    /// Every audit row written by one run
    pub async fn history_for_run(&self, run_id: i64) -> Result<Vec<ProductHistoryEntry>> {
        let rows = sqlx::query("SELECT * FROM product_history WHERE sync_log_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::map_history).collect()
    }
}

#[async_trait]
impl SyncLogStore for SqliteSyncLogStore {
    async fn insert_run(&self, run: &NewSyncRun) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO sync_logs
            (started_at, feed_path, feed_record_count, status, batch_size, offset_start, actor_id, dry_run)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(timestamp(Utc::now()))
        .bind(&run.feed_path)
        .bind(run.feed_record_count.map(to_i64))
        .bind(SyncRunStatus::Running)
        .bind(to_i64(run.batch_size))
        .bind(to_i64(run.offset_start))
        .bind(run.actor_id)
        .bind(i64::from(run.dry_run))
        .execute(&*self.pool)
        .await
        .context("Failed to insert sync run")?;

        Ok(result.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, completion: &RunCompletion) -> Result<()> {
        let stats = &completion.stats;
        let result = sqlx::query(
            r"
            UPDATE sync_logs SET
                finished_at = ?,
                status = ?,
                feed_record_count = COALESCE(?, feed_record_count),
                products_processed = ?,
                products_updated = ?,
                products_unchanged = ?,
                products_skipped = ?,
                products_skipped_instock = ?,
                products_locked = ?,
                products_not_found = ?,
                products_errors = ?,
                execution_time = ?,
                offset_end = ?,
                error_message = ?
            WHERE id = ?
            ",
        )
        .bind(timestamp(Utc::now()))
        .bind(completion.status)
        .bind(completion.feed_record_count.map(to_i64))
        .bind(to_i64(stats.processed))
        .bind(to_i64(stats.updated))
        .bind(to_i64(stats.unchanged))
        .bind(to_i64(stats.skipped))
        .bind(to_i64(stats.skipped_in_stock))
        .bind(to_i64(stats.locked))
        .bind(to_i64(stats.not_found))
        .bind(to_i64(stats.errors))
        .bind(completion.execution_time_secs)
        .bind(to_i64(completion.offset_end))
        .bind(completion.error_message.as_deref())
        .bind(run_id)
        .execute(&*self.pool)
        .await
        .context("Failed to complete sync run")?;

        if result.rows_affected() == 0 {
            warn!("Sync run {} vanished before completion was recorded", run_id);
        }
        Ok(())
    }

    async fn append_history(&self, run_id: i64, entries: &[NewHistoryEntry]) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }

        let recorded_at = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in entries.chunks(HISTORY_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO product_history \
                 (product_id, sync_log_id, external_id, field_changed, old_value, new_value, recorded_at) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.product_id)
                    .push_bind(run_id)
                    .push_bind(entry.external_id.clone())
                    .push_bind(entry.change.field.clone())
                    .push_bind(entry.change.old_value.clone())
                    .push_bind(entry.change.new_value.clone())
                    .push_bind(recorded_at.clone());
            });
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await.context("Failed to append product history")?;
        Ok(written)
    }

    async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_logs ORDER BY started_at DESC, id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::map_run).collect()
    }

    async fn last_run(&self) -> Result<Option<SyncRun>> {
        Ok(self.recent_runs(1).await?.into_iter().next())
    }

    async fn product_history(&self, product_id: ProductId, limit: u32) -> Result<Vec<ProductHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM product_history WHERE product_id = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
        )
        .bind(product_id)
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(Self::map_history).collect()
    }

    async fn aggregate_stats(&self, window_days: u32) -> Result<SyncStatsSummary> {
        let since = timestamp(Utc::now() - chrono::Duration::days(i64::from(window_days)));
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) AS total_runs,
                COALESCE(SUM(products_updated), 0) AS total_updated,
                COALESCE(SUM(products_errors), 0) AS total_errors,
                COALESCE(AVG(execution_time), 0.0) AS avg_execution_time,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_runs
            FROM sync_logs
            WHERE started_at >= ? AND dry_run = 0
            ",
        )
        .bind(since)
        .fetch_one(&*self.pool)
        .await?;

        Ok(SyncStatsSummary {
            window_days,
            total_runs: to_u64(row.try_get("total_runs")?),
            total_updated: to_u64(row.try_get("total_updated")?),
            total_errors: to_u64(row.try_get("total_errors")?),
            avg_execution_secs: row.try_get("avg_execution_time")?,
            failed_runs: to_u64(row.try_get("failed_runs")?),
        })
    }

    async fn reclaim_stale_runs(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = timestamp(Utc::now() - older_than);
        let result = sqlx::query(
            r"
            UPDATE sync_logs SET status = ?, error_message = ?, finished_at = ?
            WHERE status = ? AND started_at < ?
            ",
        )
        .bind(SyncRunStatus::Failed)
        .bind(STALE_RUN_MESSAGE)
        .bind(timestamp(Utc::now()))
        .bind(SyncRunStatus::Running)
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::FieldChange;
    use crate::infrastructure::DatabaseConnection;

    async fn store() -> Result<SqliteSyncLogStore> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(SqliteSyncLogStore::new(db.pool().clone()))
    }

    fn new_run(offset: u64) -> NewSyncRun {
        NewSyncRun {
            feed_path: "/feeds/supplier.xml".into(),
            feed_record_count: None,
            batch_size: 25,
            offset_start: offset,
            actor_id: 390,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn run_lifecycle_is_recorded() -> Result<()> {
        let store = store().await?;
        let id = store.insert_run(&new_run(0)).await?;

        let running = store.last_run().await?.context("run")?;
        assert_eq!(running.status, SyncRunStatus::Running);
        assert!(running.finished_at.is_none());

        let mut stats = BatchStats::default();
        stats.processed = 10;
        stats.updated = 4;
        stats.unchanged = 6;
        store
            .complete_run(
                id,
                &RunCompletion {
                    status: SyncRunStatus::Completed,
                    stats,
                    execution_time_secs: 1.5,
                    offset_end: 10,
                    feed_record_count: Some(10),
                    error_message: None,
                },
            )
            .await?;

        let done = store.last_run().await?.context("run")?;
        assert_eq!(done.status, SyncRunStatus::Completed);
        assert_eq!(done.stats, stats);
        assert_eq!(done.offset_end, Some(10));
        assert_eq!(done.feed_record_count, Some(10));
        assert!(done.finished_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn history_is_appended_in_bulk_and_queried_newest_first() -> Result<()> {
        let store = store().await?;
        let run = store.insert_run(&new_run(0)).await?;

        let entries: Vec<_> = (0..400)
            .map(|i| {
                NewHistoryEntry::new(
                    i % 2,
                    format!("SKU-{i}"),
                    FieldChange::new("fs_supplier_price", i.to_string(), (i + 1).to_string()),
                )
            })
            .collect();
        assert_eq!(store.append_history(run, &entries).await?, 400);
        assert_eq!(store.append_history(run, &[]).await?, 0);

        let history = store.product_history(1, 50).await?;
        assert_eq!(history.len(), 50);
        assert!(history.iter().all(|h| h.product_id == 1 && h.run_id == run));
        assert!(history[0].id > history[1].id);
        assert_eq!(store.history_for_run(run).await?.len(), 400);
        Ok(())
    }

    #[tokio::test]
    async fn stale_running_rows_are_reclaimed() -> Result<()> {
        let store = store().await?;
        let stale = store.insert_run(&new_run(0)).await?;
        sqlx::query("UPDATE sync_logs SET started_at = ? WHERE id = ?")
            .bind(timestamp(Utc::now() - chrono::Duration::minutes(10)))
            .bind(stale)
            .execute(&*store.pool)
            .await?;
        let fresh = store.insert_run(&new_run(25)).await?;

        assert_eq!(store.reclaim_stale_runs(chrono::Duration::minutes(5)).await?, 1);

        let runs = store.recent_runs(10).await?;
        let stale_run = runs.iter().find(|r| r.id == stale).context("stale")?;
        assert_eq!(stale_run.status, SyncRunStatus::Failed);
        assert_eq!(stale_run.error_message.as_deref(), Some(STALE_RUN_MESSAGE));
        let fresh_run = runs.iter().find(|r| r.id == fresh).context("fresh")?;
        assert_eq!(fresh_run.status, SyncRunStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn aggregate_stats_cover_the_window() -> Result<()> {
        let store = store().await?;
        for (status, updated, secs, dry_run) in [
            (SyncRunStatus::Completed, 5, 2.0, false),
            (SyncRunStatus::Failed, 0, 4.0, false),
            (SyncRunStatus::Completed, 10, 30.0, true),
        ] {
            let id = store
                .insert_run(&NewSyncRun {
                    dry_run,
                    ..new_run(0)
                })
                .await?;
            let stats = BatchStats {
                updated,
                processed: updated,
                ..BatchStats::default()
            };
            store
                .complete_run(
                    id,
                    &RunCompletion {
                        status,
                        stats,
                        execution_time_secs: secs,
                        offset_end: updated,
                        feed_record_count: None,
                        error_message: None,
                    },
                )
                .await?;
        }

        let summary = store.aggregate_stats(30).await?;
        // dry runs stay listed but never count
        assert_eq!(store.recent_runs(10).await?.len(), 3);
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.total_updated, 5);
        assert_eq!(summary.failed_runs, 1);
        assert!((summary.avg_execution_secs - 3.0).abs() < 1e-9);
        Ok(())
    }
}
