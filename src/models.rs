//! Data types and associated functions and methods

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// One unit of work: a single remote object to process.
///
/// Tasks are created once by the catalog lookup and consumed exactly once by a
/// worker. The `index` records the task's position in the original ordered
/// object list and correlates the task with its slot in the
/// [BatchResult](crate::models::BatchResult).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Task {
    /// Position of the task in the input object list.
    pub index: usize,
    /// Object identifier, an `s3://bucket/key` URL.
    pub object: String,
}

impl Task {
    /// Return a new Task object.
    pub fn new(index: usize, object: &str) -> Self {
        Task {
            index,
            object: object.to_string(),
        }
    }
}

/// Coarse category for a per-item failure.
///
/// Failures are data, not errors: a failed item occupies a slot in the batch
/// result rather than aborting the batch.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailureReason {
    /// The object could not be fetched from storage.
    Fetch,
    /// The object bytes could not be parsed.
    Parse,
    /// The injected compute function failed.
    Compute,
    /// The task was abandoned during pool shutdown.
    Cancelled,
}

/// The terminal outcome of processing one [Task].
///
/// Exactly one ProcessResult exists per task, correlated by `index`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ProcessResult {
    /// The item was fetched, parsed and reduced.
    Success {
        /// Position of the source task in the input object list.
        index: usize,
        /// Observation timestamp extracted from the object header, if present.
        timestamp: Option<DateTime<Utc>>,
        /// Scalar output of the compute step.
        metric: f64,
    },
    /// The item failed at some stage of processing.
    Failure {
        /// Position of the source task in the input object list.
        index: usize,
        /// Category of the failure.
        reason: FailureReason,
    },
}

impl ProcessResult {
    /// Returns the input-order index of the task this result resolves.
    pub fn index(&self) -> usize {
        match self {
            ProcessResult::Success { index, .. } => *index,
            ProcessResult::Failure { index, .. } => *index,
        }
    }

    /// Returns true for the `Success` variant.
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessResult::Success { .. })
    }
}

/// The complete, input-ordered collection of process results for one batch.
///
/// The sequence has one slot per input task, ordered by task index regardless
/// of the order in which workers completed. Immutable once built by the
/// collector.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BatchResult(Vec<ProcessResult>);

impl BatchResult {
    /// Return a new BatchResult from results already in index order.
    pub(crate) fn new(results: Vec<ProcessResult>) -> Self {
        BatchResult(results)
    }

    /// Number of slots in the result, equal to the number of input tasks.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the batch contained no tasks.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the result slot at `index`, if within bounds.
    pub fn get(&self, index: usize) -> Option<&ProcessResult> {
        self.0.get(index)
    }

    /// Iterate over the slots in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, ProcessResult> {
        self.0.iter()
    }

    /// Number of failed slots.
    pub fn failures(&self) -> usize {
        self.0.iter().filter(|result| !result.is_success()).count()
    }
}

/// Configuration for one batch run.
///
/// This is the single control surface of the engine. There is no ambient
/// process-wide state; everything a run needs is passed in here.
#[derive(Clone, Debug, Validate)]
#[validate(schema(function = "validate_batch_config"))]
pub struct BatchConfig {
    /// Logical dataset name to look up in the catalog.
    #[validate(length(min = 1, message = "dataset must not be empty"))]
    pub dataset: String,
    /// Start of the time range.
    pub start: DateTime<Utc>,
    /// End of the time range.
    pub stop: DateTime<Utc>,
    /// Lower bound on the worker count.
    #[validate(range(min = 1, message = "min_workers must be greater than 0"))]
    pub min_workers: usize,
    /// Upper bound on the worker count.
    pub max_workers: usize,
    /// Maximum time to wait for in-flight items to resolve during shutdown.
    pub drain_timeout: Duration,
    /// Opaque per-worker provisioning hints, passed through uninterpreted to
    /// the scale provider.
    pub worker_hints: Option<serde_json::Value>,
}

/// Validate cross-field constraints on a [BatchConfig].
fn validate_batch_config(config: &BatchConfig) -> Result<(), ValidationError> {
    if config.min_workers > config.max_workers {
        let mut error = ValidationError::new("min_workers must not exceed max_workers");
        error.add_param("min_workers".into(), &config.min_workers);
        error.add_param("max_workers".into(), &config.max_workers);
        return Err(error);
    }
    if config.start >= config.stop {
        let mut error = ValidationError::new("start must be before stop");
        error.add_param("start".into(), &config.start.to_rfc3339());
        error.add_param("stop".into(), &config.stop.to_rfc3339());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn valid_config() {
        let config = test_utils::get_test_batch_config();
        config.validate().unwrap();
    }

    #[test]
    fn config_empty_dataset() {
        let mut config = test_utils::get_test_batch_config();
        config.dataset = "".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_zero_min_workers() {
        let mut config = test_utils::get_test_batch_config();
        config.min_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_min_exceeds_max() {
        let mut config = test_utils::get_test_batch_config();
        config.min_workers = 8;
        config.max_workers = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_inverted_range() {
        let mut config = test_utils::get_test_batch_config();
        std::mem::swap(&mut config.start, &mut config.stop);
        assert!(config.validate().is_err());
    }

    #[test]
    fn process_result_index() {
        let success = ProcessResult::Success {
            index: 3,
            timestamp: None,
            metric: 1.5,
        };
        assert_eq!(3, success.index());
        assert!(success.is_success());
        let failure = ProcessResult::Failure {
            index: 7,
            reason: FailureReason::Parse,
        };
        assert_eq!(7, failure.index());
        assert!(!failure.is_success());
    }

    #[test]
    fn process_result_serde_round_trip() {
        let result = ProcessResult::Success {
            index: 0,
            timestamp: Some("2021-01-01T00:00:00Z".parse().unwrap()),
            metric: 42.0,
        };
        let json = serde_json::to_string(&result).unwrap();
        let decoded: ProcessResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, decoded);
    }

    #[test]
    fn failure_reason_display() {
        assert_eq!("parse", FailureReason::Parse.to_string());
        assert_eq!("cancelled", FailureReason::Cancelled.to_string());
    }

    #[test]
    fn batch_result_accessors() {
        let result = BatchResult::new(vec![
            ProcessResult::Success {
                index: 0,
                timestamp: None,
                metric: 1.0,
            },
            ProcessResult::Failure {
                index: 1,
                reason: FailureReason::Fetch,
            },
        ]);
        assert_eq!(2, result.len());
        assert!(!result.is_empty());
        assert_eq!(1, result.failures());
        assert_eq!(1, result.get(1).unwrap().index());
    }
}
