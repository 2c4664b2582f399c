//! Per-batch and cumulative sync statistics
//!
//! Every record read from the feed lands in exactly one [`Tally`] bucket, so
//! `processed` always equals the sum of the category counters. Cumulative
//! statistics survive process boundaries as an opaque base64 token.

use crate::domain::errors::SnapshotError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Final category of one feed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tally {
    Updated,
    Unchanged,
    Skipped,
    SkippedInStock,
    Locked,
    NotFound,
    Error,
}

/// Counters of one batch, or of one invocation when summed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub processed: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub skipped_in_stock: u64,
    pub locked: u64,
    pub errors: u64,
    pub not_found: u64,
}

impl BatchStats {
    pub fn count(&mut self, tally: Tally) {
        self.processed += 1;
        let slot = match tally {
            Tally::Updated => &mut self.updated,
            Tally::Unchanged => &mut self.unchanged,
            Tally::Skipped => &mut self.skipped,
            Tally::SkippedInStock => &mut self.skipped_in_stock,
            Tally::Locked => &mut self.locked,
            Tally::NotFound => &mut self.not_found,
            Tally::Error => &mut self.errors,
        };
        *slot += 1;
    }

    /// Sum of every category counter
    pub const fn categorized(&self) -> u64 {
        self.updated
            + self.unchanged
            + self.skipped
            + self.skipped_in_stock
            + self.locked
            + self.not_found
            + self.errors
    }

    pub const fn is_empty(&self) -> bool {
        self.processed == 0
    }

    /// Share of `part` in `processed`, in percent
    pub fn percent(&self, part: u64) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            part as f64 * 100.0 / self.processed as f64
        }
    }
}

impl AddAssign for BatchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.updated += rhs.updated;
        self.unchanged += rhs.unchanged;
        self.skipped += rhs.skipped;
        self.skipped_in_stock += rhs.skipped_in_stock;
        self.locked += rhs.locked;
        self.errors += rhs.errors;
        self.not_found += rhs.not_found;
    }
}

/// Totals of one logical sync session, possibly spanning several invocations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativeStats {
    /// Batches whose commits completed
    pub batches: u64,
    /// Invocations (resume cycles) contributing to these totals
    pub invocations: u64,
    #[serde(flatten)]
    pub totals: BatchStats,
    pub total_time_secs: f64,
}

impl CumulativeStats {
    pub fn absorb_batch(&mut self, batch: &BatchStats) {
        self.batches += 1;
        self.totals += *batch;
    }

    pub fn finish_invocation(&mut self, elapsed_secs: f64) {
        self.invocations += 1;
        self.total_time_secs += elapsed_secs;
    }

    /// Records per second over the whole session
    pub fn throughput(&self) -> f64 {
        if self.total_time_secs > 0.0 {
            self.totals.processed as f64 / self.total_time_secs
        } else {
            0.0
        }
    }

    /// Serialize for transport to the next invocation
    pub fn to_token(&self) -> Result<String, SnapshotError> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn from_token(token: &str) -> Result<Self, SnapshotError> {
        let bytes = STANDARD.decode(token.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
