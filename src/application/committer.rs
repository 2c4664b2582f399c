//! Batch commit pass
//!
//! Queued changes are applied one record at a time against a fresh read of
//! the record. A failure is confined to its own record: it is logged, counted
//! and the remaining changes still go through. Audit rows accumulate in an
//! [`AuditBuffer`] and reach the run log in a single append per batch.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::domain::catalog::ProductId;
use crate::domain::decision::{FieldChange, PendingChange, fields, format_attempted_price, format_price};
use crate::domain::lock_policy::LockReason;
use crate::domain::repositories::{CatalogStore, SyncLogStore};
use crate::domain::sync_run::NewHistoryEntry;

/// Changes decided for the current batch, in feed order
#[derive(Debug, Default)]
pub struct ChangeQueue {
    changes: Vec<PendingChange>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: PendingChange) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.iter()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// Audit rows of one batch awaiting the bulk append
#[derive(Debug, Default)]
pub struct AuditBuffer {
    entries: Vec<NewHistoryEntry>,
}

impl AuditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_change(&mut self, change: &PendingChange) {
        self.entries.extend(
            change
                .audit
                .iter()
                .cloned()
                .map(|c| NewHistoryEntry::new(change.product_id, change.external_id.clone(), c)),
        );
    }

    /// Lock event: old value is the lock label, new value the rejected price
    pub fn record_lock(
        &mut self,
        product_id: ProductId,
        external_id: &str,
        reason: &LockReason,
        attempted_price: Option<f64>,
    ) {
        self.entries.push(NewHistoryEntry::new(
            product_id,
            external_id,
            FieldChange::new(fields::PRODUCT_LOCKED, reason.label, format_attempted_price(attempted_price)),
        ));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NewHistoryEntry] {
        &self.entries
    }

    /// Append everything buffered under `run_id` and empty the buffer
    pub async fn flush(&mut self, store: &dyn SyncLogStore, run_id: i64) -> Result<u64> {
        if self.entries.is_empty() {
            return Ok(0);
        }
        let written = store
            .append_history(run_id, &self.entries)
            .await
            .with_context(|| format!("Failed to append {} history rows", self.entries.len()))?;
        self.entries.clear();
        Ok(written)
    }
}

/// Result of committing one queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: Vec<ProductId>,
    pub failed: Vec<ProductId>,
}

impl CommitReport {
    pub fn updated(&self) -> u64 {
        self.committed.len() as u64
    }

    pub fn errors(&self) -> u64 {
        self.failed.len() as u64
    }
}

pub struct Committer<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> Committer<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Apply every queued change; successful ones have their audit rows
    /// moved into `audit`
    pub async fn commit(&self, queue: &ChangeQueue, audit: &mut AuditBuffer) -> CommitReport {
        let mut report = CommitReport::default();

        for change in queue.iter() {
            match self.commit_one(change).await {
                Ok(()) => {
                    if change.publishes() {
                        info!(
                            "📢 Product {} ({}) published, supplier price {}",
                            change.product_id,
                            change.external_id,
                            format_price(change.new_price)
                        );
                    } else {
                        info!(
                            "💾 Product {} ({}) updated, supplier price {}",
                            change.product_id,
                            change.external_id,
                            format_price(change.new_price)
                        );
                    }
                    audit.record_change(change);
                    report.committed.push(change.product_id);
                }
                Err(e) => {
                    error!(
                        "❌ Failed to update product {} ({}): {:#}",
                        change.product_id, change.external_id, e
                    );
                    report.failed.push(change.product_id);
                }
            }
        }

        if !report.failed.is_empty() {
            warn!(
                "⚠️ {} of {} queued changes failed to commit",
                report.failed.len(),
                queue.len()
            );
        }
        report
    }

    async fn commit_one(&self, change: &PendingChange) -> Result<()> {
        let mut record = self
            .store
            .find_record(change.product_id)
            .await?
            .with_context(|| format!("Product {} disappeared before commit", change.product_id))?;
        change.apply_to(&mut record);
        self.store.save(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{BackorderPolicy, LifecycleStatus, StockStatus};
    use crate::domain::sync_run::NewSyncRun;
    use crate::test_utils::{InstrumentedCatalogStore, TEST_ACTOR_ID, TestContext};

    fn change(product_id: ProductId, sku: &str, price: f64) -> PendingChange {
        PendingChange {
            product_id,
            external_id: sku.into(),
            new_price: price,
            new_status: None,
            audit: vec![FieldChange::new(fields::SUPPLIER_PRICE, "1", format_price(price))],
        }
    }

    async fn open_run(ctx: &TestContext) -> anyhow::Result<i64> {
        ctx.sync_log
            .insert_run(&NewSyncRun {
                feed_path: "feed.xml".into(),
                feed_record_count: None,
                batch_size: 25,
                offset_start: 0,
                actor_id: TEST_ACTOR_ID,
                dry_run: false,
            })
            .await
    }

    #[tokio::test]
    async fn commits_apply_backorder_state() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let id = ctx.seed_product("SKU-1", LifecycleStatus::Publish, Some("1")).await?;

        let mut queue = ChangeQueue::new();
        queue.push(change(id, "SKU-1", 2.5));
        let mut audit = AuditBuffer::new();
        let report = Committer::new(ctx.catalog.as_ref()).commit(&queue, &mut audit).await;

        assert_eq!(report.updated(), 1);
        assert_eq!(audit.len(), 1);
        let saved = ctx.catalog.find_record(id).await?.expect("record");
        assert_eq!(saved.supplier_price.as_deref(), Some("2.5"));
        assert!(!saved.manage_stock);
        assert_eq!(saved.backorders, BackorderPolicy::Yes);
        assert_eq!(saved.stock_status, StockStatus::OnBackorder);
        Ok(())
    }

    #[tokio::test]
    async fn one_failed_save_does_not_stop_the_batch() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let ids = ctx.seed_published(3, "1").await?;
        let store = ctx.instrumented();
        store.fail_save_for(ids[1]);

        let mut queue = ChangeQueue::new();
        for (i, id) in ids.iter().enumerate() {
            queue.push(change(*id, &format!("SKU-{i}"), 9.0));
        }
        let mut audit = AuditBuffer::new();
        let report = Committer::new(store.as_ref()).commit(&queue, &mut audit).await;

        assert_eq!(report.committed, vec![ids[0], ids[2]]);
        assert_eq!(report.failed, vec![ids[1]]);
        assert_eq!(InstrumentedCatalogStore::count(&store.saves), 3);
        assert_eq!(audit.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn vanished_record_is_an_error() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let mut queue = ChangeQueue::new();
        queue.push(change(4242, "GHOST", 1.0));
        let mut audit = AuditBuffer::new();

        let report = Committer::new(ctx.catalog.as_ref()).commit(&queue, &mut audit).await;
        assert_eq!(report.errors(), 1);
        assert!(audit.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn audit_buffer_flushes_once_and_empties() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let run_id = open_run(&ctx).await?;
        let id = ctx.seed_product("SKU-L", LifecycleStatus::Publish, Some("3")).await?;

        let mut audit = AuditBuffer::new();
        let reason = LockReason {
            attribute: crate::domain::catalog::attribute_keys::BLOCK_XML_UPDATE,
            label: "XML Update Block",
        };
        audit.record_lock(id, "SKU-L", &reason, Some(99.5));

        assert_eq!(audit.flush(ctx.sync_log.as_ref(), run_id).await?, 1);
        assert!(audit.is_empty());
        assert_eq!(audit.flush(ctx.sync_log.as_ref(), run_id).await?, 0);

        let history = ctx.sync_log.product_history(id, 10).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, fields::PRODUCT_LOCKED);
        assert_eq!(history[0].old_value, "XML Update Block");
        assert_eq!(history[0].new_value, "99.5");
        Ok(())
    }
}
