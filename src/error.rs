//! Error taxonomy for the statistics engine.
//!
//! Missing and malformed chat data are expected during rebuilds and are
//! handled by skipping the affected chat. Everything else is propagated.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    /// Chat directory or chat file does not exist
    #[error("Missing file: {}", path.display())]
    MissingFile { path: PathBuf },

    /// Chat content could not be parsed or is empty
    #[error("Malformed chat data in {}: {reason}", path.display())]
    MalformedData { path: PathBuf, reason: String },

    /// Persisted snapshot is unreadable or has an incompatible version
    #[error("Snapshot corrupt: {reason}")]
    SnapshotCorrupt { reason: String },

    /// A value was removed from an accumulator that never held it
    #[error("Accumulator does not contain value {value}")]
    AccumulatorConsistency { value: f64 },

    /// Snapshot write failed
    #[error("Failed to persist snapshot to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Chat or character name that would escape the data directory
    #[error("Invalid name: {name}")]
    InvalidName { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StatsError>;

impl StatsError {
    /// Errors that mean "no data here" rather than a failure.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            StatsError::MissingFile { .. } | StatsError::MalformedData { .. }
        )
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StatsError::MalformedData {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_malformed_are_skippable() {
        let missing = StatsError::MissingFile {
            path: PathBuf::from("/nope/chat.jsonl"),
        };
        let malformed = StatsError::malformed("/x/chat.jsonl", "empty");
        let corrupt = StatsError::SnapshotCorrupt {
            reason: "bad json".into(),
        };

        assert!(missing.is_skippable());
        assert!(malformed.is_skippable());
        assert!(!corrupt.is_skippable());
        assert!(format!("{malformed}").contains("empty"));
    }
}
