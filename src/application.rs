//! Application layer - the sync engine
//!
//! Caches, validation, commit and the orchestrator that drives a sync run
//! over the domain types and store ports.

pub mod attribute_cache;
pub mod committer;
pub mod execution_budget;
pub mod feed_validator;
pub mod identity_cache;
pub mod orchestrator;

pub use attribute_cache::AttributeCache;
pub use committer::{AuditBuffer, ChangeQueue, CommitReport, Committer};
pub use execution_budget::{ExecutionBudget, ExecutionLimit};
pub use feed_validator::{FeedValidator, ValidationPolicy, ValidationReport};
pub use identity_cache::IdentityCache;
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncPhase, SyncRequest};
