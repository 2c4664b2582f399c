//! Feed completeness gate
//!
//! Compares the number of records in the feed with the number of published
//! catalog records before a destructive run. A feed that looks truncated is
//! re-counted after a pause, and the run is refused once the attempts are
//! exhausted.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::catalog::LifecycleStatus;
use crate::domain::errors::SyncError;
use crate::domain::repositories::CatalogStore;
use crate::infrastructure::config::{FeedSchema, SyncConfig};
use crate::infrastructure::feed_reader::count_records;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Minimum feed/published ratio
    pub min_ratio: f64,
    /// Ratio check applies only above this many published records
    pub min_published: u64,
}

impl From<&SyncConfig> for ValidationPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.validation_max_attempts.max(1),
            retry_delay: config.validation_retry_delay(),
            min_ratio: config.validation_min_ratio,
            min_published: config.validation_min_published,
        }
    }
}

impl ValidationPolicy {
    /// Zero records, or fewer than `⌊min_ratio × published⌋` once the catalog
    /// is large enough for the ratio to be meaningful
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn is_incomplete(&self, feed_count: u64, published_count: u64) -> bool {
        if feed_count == 0 {
            return true;
        }
        let threshold = (published_count as f64 * self.min_ratio).floor() as u64;
        published_count > self.min_published && feed_count < threshold
    }
}

/// Counts observed by the accepted attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    pub feed_count: u64,
    pub published_count: u64,
    pub attempts: u32,
}

pub struct FeedValidator<'a> {
    store: &'a dyn CatalogStore,
    schema: &'a FeedSchema,
    policy: ValidationPolicy,
}

impl<'a> FeedValidator<'a> {
    pub fn new(store: &'a dyn CatalogStore, schema: &'a FeedSchema, policy: ValidationPolicy) -> Self {
        Self { store, schema, policy }
    }

    pub async fn validate(&self, feed_path: &Path) -> Result<ValidationReport, SyncError> {
        let mut last = (0, 0);

        for attempt in 1..=self.policy.max_attempts {
            let feed_count = self.count_feed(feed_path).await?;
            let published_count = self.store.count_by_status(&LifecycleStatus::Publish).await?;
            last = (feed_count, published_count);

            if !self.policy.is_incomplete(feed_count, published_count) {
                info!(
                    "✅ Feed validation passed: {} records in feed, {} published products",
                    feed_count, published_count
                );
                return Ok(ValidationReport {
                    feed_count,
                    published_count,
                    attempts: attempt,
                });
            }

            warn!(
                "⚠️ Feed looks incomplete (attempt {}/{}): {} records in feed, {} published products",
                attempt, self.policy.max_attempts, feed_count, published_count
            );
            if attempt < self.policy.max_attempts && !self.policy.retry_delay.is_zero() {
                info!("⏳ Waiting {:?} before re-counting the feed", self.policy.retry_delay);
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(SyncError::FeedValidation {
            attempts: self.policy.max_attempts,
            feed_count: last.0,
            published_count: last.1,
        })
    }

    /// Counting pass on the blocking pool
    async fn count_feed(&self, feed_path: &Path) -> Result<u64, SyncError> {
        let path: PathBuf = feed_path.to_path_buf();
        let schema = self.schema.clone();
        let count = tokio::task::spawn_blocking(move || count_records(&path, &schema))
            .await
            .map_err(|e| SyncError::Store(anyhow::anyhow!("feed counting task failed: {e}")))??;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestContext, uniform_feed_xml, write_feed};
    use rstest::rstest;
    use tempfile::tempdir;

    fn policy(max_attempts: u32) -> ValidationPolicy {
        ValidationPolicy {
            max_attempts,
            retry_delay: Duration::ZERO,
            min_ratio: 0.5,
            min_published: 100,
        }
    }

    #[rstest]
    #[case(0, 0, true)]
    #[case(0, 50, true)]
    #[case(400, 1000, true)]
    #[case(499, 1000, true)]
    #[case(500, 1000, false)]
    #[case(600, 1000, false)]
    #[case(10, 100, false)]
    #[case(10, 101, true)]
    #[case(1, 20, false)]
    fn completeness_threshold(#[case] feed: u64, #[case] published: u64, #[case] incomplete: bool) {
        assert_eq!(policy(3).is_incomplete(feed, published), incomplete);
    }

    #[tokio::test]
    async fn truncated_feed_fails_after_all_attempts() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        ctx.seed_published(1000, "1").await?;
        let dir = tempdir()?;
        let path = dir.path().join("feed.xml");
        write_feed(&path, &uniform_feed_xml(400, "1"))?;

        let schema = FeedSchema::default();
        let validator = FeedValidator::new(ctx.catalog.as_ref(), &schema, policy(3));
        match validator.validate(&path).await {
            Err(SyncError::FeedValidation { attempts, feed_count, published_count }) => {
                assert_eq!(attempts, 3);
                assert_eq!(feed_count, 400);
                assert_eq!(published_count, 1000);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn sufficient_feed_passes_first_time() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        ctx.seed_published(1000, "1").await?;
        let dir = tempdir()?;
        let path = dir.path().join("feed.xml");
        write_feed(&path, &uniform_feed_xml(600, "1"))?;

        let schema = FeedSchema::default();
        let report = FeedValidator::new(ctx.catalog.as_ref(), &schema, policy(3))
            .validate(&path)
            .await?;
        assert_eq!(report.attempts, 1);
        assert_eq!(report.feed_count, 600);
        Ok(())
    }

    #[tokio::test]
    async fn missing_feed_is_an_open_error() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let schema = FeedSchema::default();
        let result = FeedValidator::new(ctx.catalog.as_ref(), &schema, policy(3))
            .validate(Path::new("/no/such/feed.xml"))
            .await;
        assert!(matches!(result, Err(SyncError::Feed(e)) if e.is_open_failure()));
        Ok(())
    }
}
