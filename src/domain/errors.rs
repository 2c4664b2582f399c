//! Error taxonomy of the sync engine
//!
//! Only feed-level and pre-flight failures surface as [`SyncError`]. Anything
//! that goes wrong while deciding or committing a single record is converted
//! into a counter increment at the record boundary and never reaches here.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the streaming feed reader
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Cannot open feed file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed feed at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("Feed read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(position: u64, message: impl Into<String>) -> Self {
        Self::Malformed {
            position,
            message: message.into(),
        }
    }

    /// Whether the file never opened, as opposed to failing mid-stream
    #[must_use]
    pub const fn is_open_failure(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Run-aborting errors of a sync invocation
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(
        "Feed validation failed after {attempts} attempts: feed has {feed_count} records, catalog has {published_count} published"
    )]
    FeedValidation {
        attempts: u32,
        feed_count: u64,
        published_count: u64,
    },

    #[error("Actor {actor_id} not found")]
    ActorNotFound { actor_id: i64 },

    #[error("Invalid resume token: {0}")]
    ResumeToken(#[from] SnapshotError),

    #[error("Store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    /// Short label persisted next to failed runs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Feed(FeedError::Open { .. }) => "feed_open",
            Self::Feed(_) => "feed_read",
            Self::FeedValidation { .. } => "feed_validation",
            Self::ActorNotFound { .. } => "actor_not_found",
            Self::ResumeToken(_) => "resume_token",
            Self::Store(_) => "store",
        }
    }
}

/// Cumulative statistics token could not be decoded
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("not a statistics snapshot: {0}")]
    Format(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_is_distinguished_from_read_failure() {
        let open = FeedError::open("/nope.xml", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(open.is_open_failure());
        assert!(open.to_string().contains("/nope.xml"));
        assert_eq!(SyncError::from(open).kind(), "feed_open");

        let malformed = FeedError::malformed(12, "unexpected end");
        assert!(!malformed.is_open_failure());
        assert_eq!(SyncError::from(malformed).kind(), "feed_read");
    }

    #[test]
    fn validation_message_carries_both_counts() {
        let err = SyncError::FeedValidation {
            attempts: 3,
            feed_count: 400,
            published_count: 1000,
        };
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("1000"));
    }
}
