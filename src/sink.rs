//! Durable persistence of batch results.
//!
//! The engine only produces the in-memory [BatchResult]; sinks decide the
//! durable format. A sink failure is reported to the caller and never
//! invalidates the in-memory result.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::BatchResult;

/// Trait for batch result persistence.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Durably store a batch result.
    async fn store(&self, result: &BatchResult) -> Result<(), SinkError>;
}

/// A [ResultSink] writing one JSON record per result slot, in input order.
pub struct JsonLinesSink {
    /// Output file path.
    path: PathBuf,
}

impl JsonLinesSink {
    /// Return a new JsonLinesSink writing to `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn store(&self, result: &BatchResult) -> Result<(), SinkError> {
        let mut lines = String::new();
        for slot in result.iter() {
            lines.push_str(&serde_json::to_string(slot)?);
            lines.push('\n');
        }
        tokio::fs::write(&self.path, lines).await?;
        tracing::info!(path = %self.path.display(), records = result.len(), "batch result stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureReason, ProcessResult};

    fn make_result() -> BatchResult {
        BatchResult::new(vec![
            ProcessResult::Success {
                index: 0,
                timestamp: Some("2021-01-01T00:00:00Z".parse().unwrap()),
                metric: 2.5,
            },
            ProcessResult::Failure {
                index: 1,
                reason: FailureReason::Parse,
            },
            ProcessResult::Success {
                index: 2,
                timestamp: None,
                metric: -1.0,
            },
        ])
    }

    #[tokio::test]
    async fn store_round_trips_records() {
        let path = std::env::temp_dir().join(format!("gatherist-sink-{}.jsonl", std::process::id()));
        let sink = JsonLinesSink::new(&path);
        let result = make_result();
        sink.store(&result).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let decoded: Vec<ProcessResult> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(3, decoded.len());
        for (index, slot) in decoded.iter().enumerate() {
            assert_eq!(result.get(index).unwrap(), slot);
        }
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn store_to_unwritable_path_fails() {
        let sink = JsonLinesSink::new(Path::new("/nonexistent-dir/results.jsonl"));
        let error = sink.store(&make_result()).await.unwrap_err();
        assert!(matches!(error, SinkError::Io(_)));
    }
}
