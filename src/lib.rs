//! Catalog Feed Sync - supplier feed reconciliation engine
//!
//! Streams a supplier XML feed in fixed-size batches and reconciles supplier
//! prices, availability and publication state against a catalog store, with
//! manual update locks, a feed completeness gate, an audit trail and
//! time-boxed resumable runs.

// Module declarations
pub mod application;
pub mod commands;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

// Re-export the engine entry points for easier access
pub use application::{ExecutionLimit, SyncOrchestrator, SyncOutcome, SyncPhase, SyncRequest};
pub use commands::{AppContext, Cli, Commands};
