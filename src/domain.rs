//! Domain module - catalog entities, sync decisions and statistics
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod catalog;
pub mod decision;
pub mod errors;
pub mod feed_record;
pub mod lock_policy;
pub mod repositories;
pub mod stats;
pub mod sync_run;

pub use catalog::{
    Actor, AttributeValue, BackorderPolicy, CatalogRecord, LifecycleStatus, ProductAttributes,
    ProductId, StockStatus, attribute_keys,
};
pub use decision::{Candidate, DecisionPolicy, FieldChange, PendingChange, RecordOutcome};
pub use errors::{FeedError, SnapshotError, SyncError};
pub use feed_record::FeedRecord;
pub use lock_policy::{LockPolicy, LockReason, LockState};
pub use repositories::{CatalogStore, SyncLogStore};
pub use stats::{BatchStats, CumulativeStats, Tally};
pub use sync_run::{
    NewHistoryEntry, NewSyncRun, ProductHistoryEntry, RunCompletion, SyncRun, SyncRunStatus,
    SyncStatsSummary,
};
