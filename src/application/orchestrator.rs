//! Sync orchestrator
//!
//! Drives one logical sync session: pre-flight checks, identity cache build,
//! then batch after batch of resolve → load attributes → decide → commit →
//! audit flush → throttle. A session is made of one or more cycles, each
//! recorded as its own run row; a cycle ends when the feed is exhausted, the
//! record limit is reached, the time budget runs out, or the feed breaks.
//!
//! ```text
//! Idle → Validating → CacheBuilding → Streaming
//!      → (Resolving → AttributeLoading → Deciding → Committing)*
//!      → Finalizing → Completed | Failed | TimedOut
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::application::attribute_cache::AttributeCache;
use crate::application::committer::{AuditBuffer, ChangeQueue, Committer};
use crate::application::execution_budget::{ExecutionBudget, ExecutionLimit};
use crate::application::feed_validator::{FeedValidator, ValidationPolicy};
use crate::application::identity_cache::IdentityCache;
use crate::domain::catalog::{Actor, CatalogRecord, ProductAttributes, ProductId};
use crate::domain::decision::{Candidate, DecisionPolicy, RecordOutcome, format_price};
use crate::domain::errors::SyncError;
use crate::domain::feed_record::FeedRecord;
use crate::domain::lock_policy::LockPolicy;
use crate::domain::repositories::{CatalogStore, SyncLogStore};
use crate::domain::stats::{BatchStats, CumulativeStats, Tally};
use crate::domain::sync_run::{NewSyncRun, RunCompletion, SyncRunStatus};
use crate::infrastructure::config::{FeedSchema, SyncConfig};
use crate::infrastructure::feed_reader::{FeedReader, count_records};

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    Validating,
    CacheBuilding,
    Streaming,
    Resolving,
    AttributeLoading,
    Deciding,
    Committing,
    Finalizing,
    Completed,
    Failed,
    TimedOut,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::CacheBuilding => "cache_building",
            Self::Streaming => "streaming",
            Self::Resolving => "resolving",
            Self::AttributeLoading => "attribute_loading",
            Self::Deciding => "deciding",
            Self::Committing => "committing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Phases entered once per batch
    pub const fn is_batch_phase(self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::AttributeLoading | Self::Deciding | Self::Committing
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request / outcome
// ============================================================================

/// Parameters of one sync invocation
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub feed_path: PathBuf,
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
    /// Ordinal of the first feed record to process
    pub offset: u64,
    /// Stop after this many records
    pub limit: Option<u64>,
    pub dry_run: bool,
    pub skip_validation: bool,
    /// Overrides the configured default actor
    pub actor_id: Option<i64>,
    /// Totals carried over from earlier invocations of the same session
    pub cumulative: Option<CumulativeStats>,
    pub max_execution: ExecutionLimit,
    /// Keep cycling after a timeout instead of returning a resume point
    pub auto_resume: Option<bool>,
}

impl SyncRequest {
    pub fn new(feed_path: impl Into<PathBuf>) -> Self {
        Self {
            feed_path: feed_path.into(),
            batch_size: None,
            offset: 0,
            limit: None,
            dry_run: false,
            skip_validation: false,
            actor_id: None,
            cumulative: None,
            max_execution: ExecutionLimit::Configured,
            auto_resume: None,
        }
    }
}

/// What a finished invocation reports back to its caller
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: SyncRunStatus,
    pub actor: Actor,
    /// One run row per cycle, oldest first
    pub run_ids: Vec<i64>,
    /// Counters of this invocation only
    pub stats: BatchStats,
    /// Counters of the whole session including carried-over totals
    pub cumulative: CumulativeStats,
    pub feed_record_count: Option<u64>,
    /// Where the next invocation should start when this one timed out
    pub resume_offset: Option<u64>,
    pub resume_token: Option<String>,
    pub dry_run: bool,
}

impl SyncOutcome {
    pub const fn timed_out(&self) -> bool {
        matches!(self.status, SyncRunStatus::Timeout)
    }
}

/// Why a cycle stopped reading the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Exhausted,
    LimitReached,
    BudgetExhausted,
}

/// Mutable state of one cycle, kept outside the streaming result so partial
/// progress survives a failure
#[derive(Debug, Default)]
struct CycleProgress {
    stats: BatchStats,
    /// Ordinal of the next unprocessed feed record
    position: u64,
    batches: u64,
}

struct CycleSettings<'a> {
    run_id: i64,
    feed_path: &'a Path,
    batch_size: usize,
    limit: Option<u64>,
    dry_run: bool,
    /// Pre-flight checks and cache build happen on the first cycle only
    first_cycle: bool,
    max_execution: Option<Duration>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    sync_log: Arc<dyn SyncLogStore>,
    config: SyncConfig,
    schema: FeedSchema,
    policy: DecisionPolicy,
    identity: Option<IdentityCache>,
    attributes: AttributeCache,
    phase: SyncPhase,
}

impl SyncOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        sync_log: Arc<dyn SyncLogStore>,
        config: SyncConfig,
        schema: FeedSchema,
    ) -> Self {
        let policy = DecisionPolicy {
            ignore_in_stock: config.ignore_in_stock,
            price_tolerance: config.price_tolerance,
            locks: LockPolicy::default(),
        };
        let attributes = AttributeCache::new(config.attribute_chunk_size);
        Self {
            catalog,
            sync_log,
            config,
            schema,
            policy,
            identity: None,
            attributes,
            phase: SyncPhase::Idle,
        }
    }

    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub const fn identity_cache(&self) -> Option<&IdentityCache> {
        self.identity.as_ref()
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn enter(&mut self, phase: SyncPhase) {
        self.phase = phase;
        if phase.is_batch_phase() {
            debug!(phase = %phase, "Sync phase");
        } else {
            info!(phase = %phase, "🔄 Sync phase");
        }
    }

    /// Run one invocation of a sync session
    pub async fn run(&mut self, mut request: SyncRequest) -> Result<SyncOutcome, SyncError> {
        self.enter(SyncPhase::Idle);
        let invocation_started = Instant::now();

        let actor = self.resolve_actor(request.actor_id).await?;
        info!(
            "🚀 Starting feed sync of {:?} as {} (offset {}, dry run: {})",
            request.feed_path, actor.login, request.offset, request.dry_run
        );

        if let Err(e) = self.reclaim_stale_runs().await {
            warn!("⚠️ Stale run reclamation failed: {}", e);
        }

        let batch_size = request.batch_size.unwrap_or(self.config.batch_size).max(1);
        let auto_resume = request.auto_resume.unwrap_or(self.config.auto_resume);
        let max_execution = request.max_execution.resolve(self.config.max_execution());
        let mut cumulative = request.cumulative.take().unwrap_or_default();
        let mut invocation_stats = BatchStats::default();
        let mut run_ids = Vec::new();
        let mut feed_record_count = None;
        let mut offset = request.offset;
        let mut remaining_limit = request.limit;
        let mut first_cycle = true;

        let status = loop {
            let cycle_started = Instant::now();
            let run_id = self
                .sync_log
                .insert_run(&NewSyncRun {
                    feed_path: request.feed_path.display().to_string(),
                    feed_record_count,
                    batch_size: batch_size as u64,
                    offset_start: offset,
                    actor_id: actor.id,
                    dry_run: request.dry_run,
                })
                .await?;
            run_ids.push(run_id);

            let mut progress = CycleProgress {
                position: offset,
                ..CycleProgress::default()
            };
            let settings = CycleSettings {
                run_id,
                feed_path: &request.feed_path,
                batch_size,
                limit: remaining_limit,
                dry_run: request.dry_run,
                first_cycle,
                max_execution,
            };
            let result = self
                .execute_cycle(&request, &settings, &mut progress, &mut cumulative, &mut feed_record_count)
                .await;

            let elapsed = cycle_started.elapsed().as_secs_f64();
            cumulative.finish_invocation(elapsed);
            invocation_stats += progress.stats;

            let (status, error_message) = match &result {
                Ok(StreamEnd::BudgetExhausted) => (SyncRunStatus::Timeout, None),
                Ok(_) => (SyncRunStatus::Completed, None),
                Err(e) => (SyncRunStatus::Failed, Some(format!("[{}] {}", e.kind(), e))),
            };

            let completion = RunCompletion {
                status,
                stats: progress.stats,
                execution_time_secs: elapsed,
                offset_end: progress.position,
                feed_record_count,
                error_message,
            };
            if let Err(e) = self.sync_log.complete_run(run_id, &completion).await {
                error!("❌ Failed to finalize run {}: {:#}", run_id, e);
            }
            log_cycle_summary(run_id, status, &progress, elapsed);

            if let Err(e) = result {
                self.enter(SyncPhase::Failed);
                error!("❌ Sync run {} failed: {}", run_id, e);
                return Err(e);
            }

            first_cycle = false;
            offset = progress.position;
            if let Some(limit) = remaining_limit.as_mut() {
                *limit = limit.saturating_sub(progress.stats.processed);
            }

            if status == SyncRunStatus::Timeout && auto_resume {
                info!("🔁 Time budget exhausted, resuming at offset {}", offset);
                continue;
            }
            break status;
        };

        self.enter(SyncPhase::Finalizing);
        if !request.dry_run {
            match self.catalog.clear_derived_caches().await {
                Ok(cleared) => info!("🧹 Cleared {} derived cache entries", cleared),
                Err(e) => warn!("⚠️ Failed to clear derived caches: {:#}", e),
            }
        }
        self.attributes.clear();

        let (resume_offset, resume_token) = if status == SyncRunStatus::Timeout {
            self.enter(SyncPhase::TimedOut);
            (Some(offset), Some(cumulative.to_token()?))
        } else {
            self.enter(SyncPhase::Completed);
            (None, None)
        };

        info!(
            "🏁 Sync finished with status {} in {:.2}s: {} records processed this invocation",
            status,
            invocation_started.elapsed().as_secs_f64(),
            invocation_stats.processed
        );

        Ok(SyncOutcome {
            status,
            actor,
            run_ids,
            stats: invocation_stats,
            cumulative,
            feed_record_count,
            resume_offset,
            resume_token,
            dry_run: request.dry_run,
        })
    }

    async fn execute_cycle(
        &mut self,
        request: &SyncRequest,
        settings: &CycleSettings<'_>,
        progress: &mut CycleProgress,
        cumulative: &mut CumulativeStats,
        feed_record_count: &mut Option<u64>,
    ) -> Result<StreamEnd, SyncError> {
        if settings.first_cycle {
            *feed_record_count = self.preflight(request).await?;
            if request.offset == 0 || self.identity.is_none() {
                self.enter(SyncPhase::CacheBuilding);
                let cache = IdentityCache::build(self.catalog.as_ref(), self.config.identity_cache_cap).await;
                self.identity = Some(cache);
            }
        }
        let mut budget = ExecutionBudget::new(
            settings.max_execution,
            self.config.safety_buffer(),
            self.config.lookahead_records,
        );
        self.stream(settings, &mut budget, progress, cumulative).await
    }

    async fn resolve_actor(&self, requested: Option<i64>) -> Result<Actor, SyncError> {
        let actor_id = requested.unwrap_or(self.config.default_actor_id);
        self.catalog
            .find_actor(actor_id)
            .await?
            .ok_or(SyncError::ActorNotFound { actor_id })
    }

    /// Validation gate plus the record count stored on the run row
    async fn preflight(&mut self, request: &SyncRequest) -> Result<Option<u64>, SyncError> {
        if request.offset > 0 {
            info!("⏭️ Resuming at offset {}, feed validation skipped", request.offset);
            return Ok(None);
        }
        if request.dry_run {
            info!("🔍 Dry run, feed validation skipped");
            return Ok(None);
        }
        if request.skip_validation {
            info!("⏭️ Feed validation skipped on request");
            let path = request.feed_path.clone();
            let schema = self.schema.clone();
            let count = tokio::task::spawn_blocking(move || count_records(&path, &schema))
                .await
                .map_err(|e| SyncError::Store(anyhow::anyhow!("feed counting task failed: {e}")))??;
            return Ok(Some(count));
        }

        self.enter(SyncPhase::Validating);
        let policy = ValidationPolicy::from(&self.config);
        let report = FeedValidator::new(self.catalog.as_ref(), &self.schema, policy)
            .validate(&request.feed_path)
            .await?;
        Ok(Some(report.feed_count))
    }

    async fn stream(
        &mut self,
        settings: &CycleSettings<'_>,
        budget: &mut ExecutionBudget,
        progress: &mut CycleProgress,
        cumulative: &mut CumulativeStats,
    ) -> Result<StreamEnd, SyncError> {
        self.enter(SyncPhase::Streaming);
        let mut reader = FeedReader::open(settings.feed_path, self.schema.clone())?;
        let start = progress.position;
        let skipped = reader.skip_records(start)?;
        if skipped < start {
            warn!("⚠️ Offset {} is past the end of the feed ({} records)", start, skipped);
        }
        progress.position = reader.position();

        let mut batch: Vec<FeedRecord> = Vec::with_capacity(settings.batch_size);
        let mut consumed = 0u64;

        loop {
            batch.clear();
            let mut end = None;
            let mut feed_error = None;

            while batch.len() < settings.batch_size {
                if settings.limit.is_some_and(|limit| consumed + batch.len() as u64 >= limit) {
                    end = Some(StreamEnd::LimitReached);
                    break;
                }
                if progress.batches > 0 && budget.should_stop() {
                    end = Some(StreamEnd::BudgetExhausted);
                    break;
                }
                match reader.next() {
                    Some(Ok(record)) => batch.push(record),
                    Some(Err(e)) => {
                        feed_error = Some(e);
                        break;
                    }
                    None => {
                        end = Some(StreamEnd::Exhausted);
                        break;
                    }
                }
            }

            if !batch.is_empty() {
                let batch_started = Instant::now();
                let stats = self.process_batch(settings, &batch).await;
                budget.observe_batch(stats.processed, batch_started.elapsed());

                consumed += batch.len() as u64;
                progress.position = reader.position();
                progress.stats += stats;
                progress.batches += 1;
                cumulative.absorb_batch(&stats);
                log_batch_summary(progress.batches, &stats, cumulative);

                if !settings.dry_run && !self.config.batch_delay().is_zero() && end.is_none() && feed_error.is_none() {
                    tokio::time::sleep(self.config.batch_delay()).await;
                }
            }

            if let Some(e) = feed_error {
                return Err(e.into());
            }
            if let Some(end) = end {
                return Ok(end);
            }
        }
    }

    /// Decide and commit one batch; never fails, every record lands in a bucket
    async fn process_batch(&mut self, settings: &CycleSettings<'_>, batch: &[FeedRecord]) -> BatchStats {
        let mut stats = BatchStats::default();

        self.enter(SyncPhase::Resolving);
        let resolved: Vec<Option<ProductId>> = batch
            .iter()
            .map(|record| {
                let id = record.trimmed_id();
                if id.is_empty() {
                    None
                } else {
                    self.identity.as_ref().and_then(|cache| cache.resolve(id))
                }
            })
            .collect();
        let mut ids: Vec<ProductId> = resolved.iter().flatten().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        let records = self.read_records(&ids).await;

        self.enter(SyncPhase::AttributeLoading);
        self.attributes.load(self.catalog.as_ref(), &ids).await;

        self.enter(SyncPhase::Deciding);
        let defaults = ProductAttributes::with_defaults();
        let mut queue = ChangeQueue::new();
        let mut audit = AuditBuffer::new();
        let dry_run = settings.dry_run;

        for (feed, product_id) in batch.iter().zip(&resolved) {
            let candidate = product_id.map(|product_id| Candidate {
                product_id,
                record: records.get(&product_id),
                attributes: self.attributes.snapshot(product_id).unwrap_or(&defaults),
            });
            let outcome = self.policy.decide(feed, candidate);
            let sku = feed.trimmed_id();

            let tally = match outcome {
                RecordOutcome::SkippedEmpty => {
                    debug!("Record {} has no identifier, skipped", feed.ordinal);
                    Tally::Skipped
                }
                RecordOutcome::SkippedInvalidPrice => {
                    warn!("⚠️ Record {} ({}) has no usable price, skipped", feed.ordinal, sku);
                    Tally::Skipped
                }
                RecordOutcome::NotFound => {
                    debug!("Product {} not found in catalog", sku);
                    Tally::NotFound
                }
                RecordOutcome::MissingRecord { product_id } => {
                    warn!("⚠️ Product {} ({}) could not be read, counted as error", product_id, sku);
                    Tally::Error
                }
                RecordOutcome::SkippedInStock { product_id } => {
                    if dry_run {
                        info!("🔍 [dry run] {} (#{}) is in stock, would skip", sku, product_id);
                    } else {
                        debug!("Product {} ({}) in stock, skipped", product_id, sku);
                    }
                    Tally::SkippedInStock
                }
                RecordOutcome::Locked {
                    product_id,
                    reason,
                    attempted_price,
                } => {
                    let attempted = attempted_price.map_or_else(|| "(none)".to_string(), format_price);
                    if dry_run {
                        info!(
                            "🔍 [dry run] {} (#{}) is locked ({}), would not update to {}",
                            sku, product_id, reason.label, attempted
                        );
                    } else {
                        info!(
                            "🔒 Product {} ({}) locked by {}, price {} not applied",
                            product_id, sku, reason.label, attempted
                        );
                        audit.record_lock(product_id, sku, &reason, attempted_price);
                    }
                    Tally::Locked
                }
                RecordOutcome::Unchanged { product_id, price } => {
                    if dry_run {
                        info!("🔍 [dry run] {} (#{}) no price change ({})", sku, product_id, format_price(price));
                    } else {
                        debug!("Product {} ({}) unchanged", product_id, sku);
                    }
                    Tally::Unchanged
                }
                RecordOutcome::Update(change) => {
                    if dry_run {
                        let verb = if change.publishes() { "publish" } else { "update" };
                        info!(
                            "🔍 [dry run] {} (#{}) would {} with supplier price {}",
                            sku,
                            change.product_id,
                            verb,
                            format_price(change.new_price)
                        );
                        stats.count(Tally::Updated);
                    } else {
                        queue.push(change);
                    }
                    continue;
                }
            };
            stats.count(tally);
        }

        if !queue.is_empty() {
            self.enter(SyncPhase::Committing);
            let report = Committer::new(self.catalog.as_ref()).commit(&queue, &mut audit).await;
            for _ in 0..report.updated() {
                stats.count(Tally::Updated);
            }
            for _ in 0..report.errors() {
                stats.count(Tally::Error);
            }
        }

        if !dry_run {
            if let Err(e) = audit.flush(self.sync_log.as_ref(), settings.run_id).await {
                warn!("⚠️ Audit rows of this batch were not written: {:#}", e);
            }
        }
        self.attributes.clear();
        stats
    }

    /// Bulk read with a per-record fallback; unreadable records are absent
    async fn read_records(&self, ids: &[ProductId]) -> HashMap<ProductId, CatalogRecord> {
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.catalog.find_records(ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ Bulk record read failed, reading {} records one by one: {:#}", ids.len(), e);
                let mut records = HashMap::with_capacity(ids.len());
                for id in ids {
                    match self.catalog.find_record(*id).await {
                        Ok(Some(record)) => {
                            records.insert(*id, record);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Product {} unreadable: {:#}", id, e),
                    }
                }
                records
            }
        }
    }

    /// Mark runs left in `running` by a crashed process as failed
    pub async fn reclaim_stale_runs(&self) -> Result<u64, SyncError> {
        let minutes = i64::try_from(self.config.stale_run_minutes).unwrap_or(i64::MAX);
        let reclaimed = self
            .sync_log
            .reclaim_stale_runs(chrono::Duration::minutes(minutes))
            .await?;
        if reclaimed > 0 {
            warn!("🧟 Reclaimed {} stale sync runs", reclaimed);
        }
        Ok(reclaimed)
    }

    pub async fn clear_derived_caches(&self) -> Result<u64, SyncError> {
        Ok(self.catalog.clear_derived_caches().await?)
    }
}

fn log_batch_summary(batch_no: u64, stats: &BatchStats, cumulative: &CumulativeStats) {
    info!(
        "📦 Batch {}: {} processed, {} updated ({:.1}%), {} unchanged, {} skipped, {} in stock, {} locked, {} not found, {} errors | session total {}",
        batch_no,
        stats.processed,
        stats.updated,
        stats.percent(stats.updated),
        stats.unchanged,
        stats.skipped,
        stats.skipped_in_stock,
        stats.locked,
        stats.not_found,
        stats.errors,
        cumulative.totals.processed
    );
}

fn log_cycle_summary(run_id: i64, status: SyncRunStatus, progress: &CycleProgress, elapsed_secs: f64) {
    let throughput = if elapsed_secs > 0.0 {
        progress.stats.processed as f64 / elapsed_secs
    } else {
        0.0
    };
    info!(
        "📊 Run {} {}: {} records in {} batches, {:.2}s ({:.1} records/s), next offset {}",
        run_id, status, progress.stats.processed, progress.batches, elapsed_secs, throughput, progress.position
    );
}
