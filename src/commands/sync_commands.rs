//! `sync` and `clear-cache` commands

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, warn};

use super::AppContext;
use crate::application::{ExecutionLimit, SyncOrchestrator, SyncOutcome, SyncRequest};
use crate::domain::stats::{BatchStats, CumulativeStats};
use crate::domain::sync_run::SyncRunStatus;

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Supplier XML feed
    pub file: PathBuf,

    /// Records per batch (defaults to the configured value)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Ordinal of the first record to process
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Process at most this many records
    #[arg(long)]
    pub limit: Option<u64>,

    /// Decide and report without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the feed completeness check
    #[arg(long)]
    pub skip_validation: bool,

    /// Actor id the run is attributed to
    #[arg(long)]
    pub user: Option<i64>,

    /// Cumulative statistics token printed by a timed-out run
    #[arg(long)]
    pub resume_token: Option<String>,

    /// Wall-clock limit per cycle in seconds; 0 disables it
    #[arg(long)]
    pub max_execution_secs: Option<u64>,

    /// Keep going after a timeout instead of printing a resume point
    #[arg(long)]
    pub auto_resume: bool,
}

impl SyncArgs {
    pub fn into_request(self) -> Result<SyncRequest> {
        let cumulative = self
            .resume_token
            .as_deref()
            .map(CumulativeStats::from_token)
            .transpose()
            .context("Invalid --resume-token")?;

        let mut request = SyncRequest::new(self.file);
        request.batch_size = self.batch_size;
        request.offset = self.offset;
        request.limit = self.limit;
        request.dry_run = self.dry_run;
        request.skip_validation = self.skip_validation;
        request.actor_id = self.user;
        request.cumulative = cumulative;
        if let Some(secs) = self.max_execution_secs {
            request.max_execution = ExecutionLimit::from_secs(secs);
        }
        request.auto_resume = self.auto_resume.then_some(true);
        Ok(request)
    }
}

pub async fn run_sync(ctx: &AppContext, args: SyncArgs) -> Result<SyncOutcome> {
    let request = args.into_request()?;
    let mut orchestrator = SyncOrchestrator::new(
        ctx.catalog.clone(),
        ctx.sync_log.clone(),
        ctx.config.sync.clone(),
        ctx.config.feed.clone(),
    );

    let outcome = orchestrator.run(request).await?;

    if outcome.status == SyncRunStatus::Completed && !outcome.dry_run {
        let finished = Utc::now().to_rfc3339();
        if let Err(e) = ctx
            .config_manager
            .update_app_managed(|managed| managed.last_successful_sync = Some(finished))
            .await
        {
            warn!("Failed to record the last successful sync: {:#}", e);
        }
    }
    Ok(outcome)
}

pub async fn clear_cache(ctx: &AppContext) -> Result<u64> {
    use crate::domain::repositories::CatalogStore;

    let cleared = ctx.catalog.clear_derived_caches().await?;
    info!("🧹 Cleared {} derived cache entries", cleared);
    Ok(cleared)
}

fn write_counters(out: &mut String, stats: &BatchStats) {
    let rows = [
        ("Updated", stats.updated),
        ("Unchanged", stats.unchanged),
        ("Skipped", stats.skipped),
        ("Skipped (in stock)", stats.skipped_in_stock),
        ("Locked", stats.locked),
        ("Not found", stats.not_found),
        ("Errors", stats.errors),
    ];
    let _ = writeln!(out, "  Processed:          {}", stats.processed);
    for (label, value) in rows {
        let _ = writeln!(out, "  {:<20}{} ({:.1}%)", format!("{label}:"), value, stats.percent(value));
    }
}

/// Human-readable final summary of an invocation
pub fn format_outcome(outcome: &SyncOutcome) -> String {
    let mut out = String::new();
    let mode = if outcome.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "Sync {}{} as {}", outcome.status, mode, outcome.actor.login);
    if let Some(count) = outcome.feed_record_count {
        let _ = writeln!(out, "Feed records: {count}");
    }
    let _ = writeln!(out, "This invocation:");
    write_counters(&mut out, &outcome.stats);

    let cumulative = &outcome.cumulative;
    if cumulative.invocations > 1 || cumulative.totals != outcome.stats {
        let _ = writeln!(
            out,
            "Session ({} invocations, {} batches):",
            cumulative.invocations, cumulative.batches
        );
        write_counters(&mut out, &cumulative.totals);
    }
    let _ = writeln!(
        out,
        "Time: {:.2}s, {:.1} records/s",
        cumulative.total_time_secs,
        cumulative.throughput()
    );

    if let (Some(offset), Some(token)) = (outcome.resume_offset, outcome.resume_token.as_deref()) {
        let _ = writeln!(out, "Timed out. Resume with: --offset {offset} --resume-token {token}");
    }
    out.trim_end().to_string()
}
