//! Repository interfaces for the sync engine
//!
//! The catalog itself is an external collaborator: the engine reads it and
//! hands mutated records back through `save`, which owns its own transactional
//! semantics. Run and audit persistence lives behind a separate port.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::catalog::{Actor, AttributeValue, CatalogRecord, LifecycleStatus, ProductId};
use crate::domain::sync_run::{
    NewHistoryEntry, NewSyncRun, ProductHistoryEntry, RunCompletion, SyncRun, SyncStatsSummary,
};

/// Raw attribute values of several records, keyed by record then attribute
pub type AttributeMap = HashMap<ProductId, HashMap<String, AttributeValue>>;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Identity
    /// When several records share an external id the highest product id wins
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ProductId>>;
    /// At most `cap` distinct non-empty external ids in product id order,
    /// duplicates resolved as in `find_by_external_id`
    async fn load_identity_index(&self, cap: usize) -> Result<HashMap<String, ProductId>>;

    // Records
    async fn find_record(&self, id: ProductId) -> Result<Option<CatalogRecord>>;
    async fn find_records(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, CatalogRecord>>;
    async fn save(&self, record: &CatalogRecord) -> Result<()>;
    async fn count_by_status(&self, status: &LifecycleStatus) -> Result<u64>;

    // Attributes
    /// Keys with no stored value are simply absent from the result
    async fn bulk_read_attributes(&self, ids: &[ProductId], keys: &[&str]) -> Result<AttributeMap>;
    async fn read_attribute(&self, id: ProductId, key: &str) -> Result<AttributeValue>;

    // Collaborators
    async fn find_actor(&self, id: i64) -> Result<Option<Actor>>;
    /// Drop downstream derived caches, returning how many entries went away
    async fn clear_derived_caches(&self) -> Result<u64>;
}

#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn insert_run(&self, run: &NewSyncRun) -> Result<i64>;
    async fn complete_run(&self, run_id: i64, completion: &RunCompletion) -> Result<()>;
    /// One bulk append; returns the number of rows written
    async fn append_history(&self, run_id: i64, entries: &[NewHistoryEntry]) -> Result<u64>;

    async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>>;
    async fn last_run(&self) -> Result<Option<SyncRun>>;
    async fn product_history(&self, product_id: ProductId, limit: u32) -> Result<Vec<ProductHistoryEntry>>;
    async fn aggregate_stats(&self, window_days: u32) -> Result<SyncStatsSummary>;

    /// Mark runs stuck in `running` longer than `older_than` as failed
    async fn reclaim_stale_runs(&self, older_than: chrono::Duration) -> Result<u64>;
}
