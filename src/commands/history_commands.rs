//! Run log and audit trail queries

use anyhow::{Result, bail};
use tracing::info;

use super::AppContext;
use crate::domain::catalog::ProductId;
use crate::domain::repositories::{CatalogStore, SyncLogStore};
use crate::domain::sync_run::{ProductHistoryEntry, SyncRun};

/// One line per run for the `runs` listing
pub fn format_run_line(run: &SyncRun) -> String {
    let mode = if run.dry_run { " dry-run" } else { "" };
    let offsets = match run.offset_end {
        Some(end) => format!("{}..{}", run.offset_start, end),
        None => format!("{}..", run.offset_start),
    };
    let mut line = format!(
        "#{:<5} {} {:<9}{} records {:<12} processed {:>6} updated {:>6} errors {:>4} {:>8.2}s",
        run.id,
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.status.as_str(),
        mode,
        offsets,
        run.stats.processed,
        run.stats.updated,
        run.stats.errors,
        run.execution_time_secs
    );
    if let Some(message) = &run.error_message {
        line.push_str(" | ");
        line.push_str(message);
    }
    line
}

fn format_history_line(entry: &ProductHistoryEntry) -> String {
    format!(
        "{} run #{} {} {}: {} -> {}",
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.run_id,
        entry.external_id,
        entry.field,
        if entry.old_value.is_empty() { "(empty)" } else { entry.old_value.as_str() },
        entry.new_value
    )
}

pub async fn show_runs(ctx: &AppContext, limit: u32) -> Result<()> {
    let runs = ctx.sync_log.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No sync runs recorded");
        return Ok(());
    }
    for run in &runs {
        println!("{}", format_run_line(run));
    }
    Ok(())
}

pub async fn show_product_history(ctx: &AppContext, product_id: ProductId, limit: u32) -> Result<()> {
    let entries = ctx.sync_log.product_history(product_id, limit).await?;
    if entries.is_empty() {
        println!("No history for product {product_id}");
        return Ok(());
    }
    println!("History of product {product_id}:");
    for entry in &entries {
        println!("  {}", format_history_line(entry));
    }
    Ok(())
}

pub async fn show_product_history_by_sku(ctx: &AppContext, sku: &str, limit: u32) -> Result<()> {
    let Some(product_id) = ctx.catalog.find_by_external_id(sku).await? else {
        bail!("No product with external id {sku}");
    };
    show_product_history(ctx, product_id, limit).await
}

pub async fn show_stats(ctx: &AppContext, days: u32) -> Result<()> {
    let summary = ctx.sync_log.aggregate_stats(days).await?;
    println!("Sync statistics, last {} days:", summary.window_days);
    println!("  Runs:             {}", summary.total_runs);
    println!("  Failed runs:      {}", summary.failed_runs);
    println!("  Products updated: {}", summary.total_updated);
    println!("  Errors:           {}", summary.total_errors);
    println!("  Avg. run time:    {:.2}s", summary.avg_execution_secs);
    Ok(())
}

pub async fn reclaim_stale(ctx: &AppContext, minutes: Option<u64>) -> Result<u64> {
    let minutes = minutes.unwrap_or(ctx.config.sync.stale_run_minutes);
    let older_than = chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(i64::MAX));
    let reclaimed = ctx.sync_log.reclaim_stale_runs(older_than).await?;
    info!("Reclaimed {} runs older than {} minutes", reclaimed, minutes);
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stats::BatchStats;
    use crate::domain::sync_run::SyncRunStatus;
    use chrono::{TimeZone, Utc};

    fn run() -> SyncRun {
        SyncRun {
            id: 7,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp"),
            finished_at: None,
            feed_path: "feed.xml".into(),
            feed_record_count: Some(500),
            status: SyncRunStatus::Failed,
            stats: BatchStats {
                processed: 40,
                updated: 3,
                ..BatchStats::default()
            },
            execution_time_secs: 1.5,
            error_message: Some("[feed_read] Malformed feed at byte 10: eof".into()),
            batch_size: 25,
            offset_start: 250,
            offset_end: Some(290),
            actor_id: 390,
            dry_run: true,
        }
    }

    #[test]
    fn run_line_carries_status_offsets_and_error() {
        let line = format_run_line(&run());
        assert!(line.starts_with("#7"));
        assert!(line.contains("2026-03-01 12:00:00"));
        assert!(line.contains("failed"));
        assert!(line.contains("dry-run"));
        assert!(line.contains("250..290"));
        assert!(line.ends_with("| [feed_read] Malformed feed at byte 10: eof"));
    }

    #[test]
    fn history_line_marks_empty_old_values() {
        let entry = ProductHistoryEntry {
            id: 1,
            product_id: 5,
            run_id: 7,
            external_id: "SKU-1".into(),
            field: "fs_supplier_price".into(),
            old_value: String::new(),
            new_value: "19.99".into(),
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp"),
        };
        assert_eq!(
            format_history_line(&entry),
            "2026-03-01 12:00:00 run #7 SKU-1 fs_supplier_price: (empty) -> 19.99"
        );
    }
}
