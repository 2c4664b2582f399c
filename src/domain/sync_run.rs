//! Persistent run log and product audit trail entities

use crate::domain::catalog::ProductId;
use crate::domain::decision::FieldChange;
use crate::domain::stats::BatchStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};
use std::fmt;

/// Outcome status of one sync invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl SyncRunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<sqlx::Sqlite> for SyncRunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncRunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        Self::parse(&s).ok_or_else(|| format!("Invalid SyncRunStatus: {s}").into())
    }
}

/// One row of the run log: a single invocation, not a logical session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub feed_path: String,
    pub feed_record_count: Option<u64>,
    pub status: SyncRunStatus,
    pub stats: BatchStats,
    pub execution_time_secs: f64,
    pub error_message: Option<String>,
    pub batch_size: u64,
    pub offset_start: u64,
    /// Resume offset: ordinal of the first record not yet processed
    pub offset_end: Option<u64>,
    pub actor_id: i64,
    pub dry_run: bool,
}

/// Fields written when a run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncRun {
    pub feed_path: String,
    pub feed_record_count: Option<u64>,
    pub batch_size: u64,
    pub offset_start: u64,
    pub actor_id: i64,
    pub dry_run: bool,
}

/// Fields written once when a run ends
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub status: SyncRunStatus,
    pub stats: BatchStats,
    pub execution_time_secs: f64,
    pub offset_end: u64,
    pub feed_record_count: Option<u64>,
    pub error_message: Option<String>,
}

/// Append-only audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductHistoryEntry {
    pub id: i64,
    pub product_id: ProductId,
    pub run_id: i64,
    pub external_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub recorded_at: DateTime<Utc>,
}

/// Audit row queued during a batch, flushed in bulk after its commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub product_id: ProductId,
    pub external_id: String,
    pub change: FieldChange,
}

impl NewHistoryEntry {
    pub fn new(product_id: ProductId, external_id: impl Into<String>, change: FieldChange) -> Self {
        Self {
            product_id,
            external_id: external_id.into(),
            change,
        }
    }
}

/// Aggregates over the run log for a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatsSummary {
    pub window_days: u32,
    pub total_runs: u64,
    pub total_updated: u64,
    pub total_errors: u64,
    pub avg_execution_secs: f64,
    pub failed_runs: u64,
}
