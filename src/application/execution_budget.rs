//! Wall-clock budget of a time-boxed sync cycle
//!
//! Keeps an exponential moving average of the per-record cost and tells the
//! orchestrator to stop once the time left (minus a safety buffer) would not
//! cover the next `lookahead` records.

use std::time::{Duration, Instant};

/// Weight of the newest observation in the moving average
const EMA_ALPHA: f64 = 0.3;

/// Per-invocation choice of wall-clock limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionLimit {
    /// Use `max_execution_secs` from the configuration
    #[default]
    Configured,
    /// No limit, whatever the configuration says
    Unlimited,
    Within(Duration),
}

impl ExecutionLimit {
    /// `0` means unlimited
    pub const fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Unlimited
        } else {
            Self::Within(Duration::from_secs(secs))
        }
    }

    pub const fn resolve(self, configured: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Configured => configured,
            Self::Unlimited => None,
            Self::Within(limit) => Some(limit),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    started: Instant,
    limit: Option<Duration>,
    safety_buffer: Duration,
    lookahead: u32,
    secs_per_record: Option<f64>,
}

impl ExecutionBudget {
    pub fn new(limit: Option<Duration>, safety_buffer: Duration, lookahead: u32) -> Self {
        Self {
            started: Instant::now(),
            limit,
            safety_buffer,
            lookahead: lookahead.max(1),
            secs_per_record: None,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, Duration::ZERO, 1)
    }

    pub const fn is_limited(&self) -> bool {
        self.limit.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Feed one completed batch into the per-record cost estimate
    pub fn observe_batch(&mut self, records: u64, elapsed: Duration) {
        if records == 0 {
            return;
        }
        let sample = elapsed.as_secs_f64() / records as f64;
        self.secs_per_record = Some(match self.secs_per_record {
            Some(avg) => EMA_ALPHA.mul_add(sample, (1.0 - EMA_ALPHA) * avg),
            None => sample,
        });
    }

    /// Current per-record estimate in seconds
    pub const fn secs_per_record(&self) -> Option<f64> {
        self.secs_per_record
    }

    /// Predicted cost of the lookahead window
    pub fn predicted_cost(&self) -> Duration {
        let secs = self.secs_per_record.unwrap_or(0.0) * f64::from(self.lookahead);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop_after(self.elapsed())
    }

    pub fn should_stop_after(&self, elapsed: Duration) -> bool {
        let Some(limit) = self.limit else {
            return false;
        };
        let usable = limit.saturating_sub(self.safety_buffer);
        let remaining = usable.saturating_sub(elapsed);
        remaining.is_zero() || remaining < self.predicted_cost()
    }
}
