//! Ordered result collection.
//!
//! The collector gathers completions into index-correlated slots, preserving
//! input order regardless of completion order. Writes to distinct indices
//! never conflict; completion is tracked by an atomic counter incremented
//! once per newly filled slot.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::error::BatchError;
use crate::metrics;
use crate::models::{BatchResult, ProcessResult};

/// Collects one [ProcessResult] per task into an ordered [BatchResult].
pub struct ResultCollector {
    /// One slot per input task, filled in completion order.
    slots: Mutex<Vec<Option<ProcessResult>>>,
    /// Number of slots filled.
    resolved: AtomicUsize,
    /// Total number of input tasks.
    total: usize,
}

impl ResultCollector {
    /// Return a new collector for a batch of `total` tasks.
    pub fn new(total: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; total]),
            resolved: AtomicUsize::new(0),
            total,
        }
    }

    /// Record one result into its slot.
    ///
    /// Safe to call concurrently from multiple workers' completion paths.
    /// A result for an already filled slot is ignored; shutdown may emit a
    /// cancellation for an item whose result raced ahead of it.
    pub async fn on_result(&self, result: ProcessResult) {
        let index = result.index();
        let mut slots = self.slots.lock().await;
        match slots.get_mut(index) {
            Some(slot @ None) => {
                metrics::record_result(&result);
                *slot = Some(result);
                self.resolved.fetch_add(1, Ordering::SeqCst);
            }
            Some(_) => {
                tracing::debug!(index, "ignoring duplicate result");
            }
            None => {
                tracing::warn!(index, total = self.total, "result index out of range");
            }
        }
    }

    /// Number of resolved tasks.
    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Returns true once every task has a terminal result.
    pub fn is_complete(&self) -> bool {
        self.resolved() == self.total
    }

    /// Return the ordered, immutable result sequence.
    ///
    /// Calling before completion is a usage error and returns
    /// [BatchError::BatchIncomplete].
    pub fn finalize(self) -> Result<BatchResult, BatchError> {
        let resolved = self.resolved();
        let slots = self.slots.into_inner();
        let results: Option<Vec<ProcessResult>> = slots.into_iter().collect();
        match results {
            Some(results) => Ok(BatchResult::new(results)),
            None => Err(BatchError::BatchIncomplete {
                resolved,
                total: self.total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureReason;

    fn success(index: usize) -> ProcessResult {
        ProcessResult::Success {
            index,
            timestamp: None,
            metric: index as f64,
        }
    }

    #[tokio::test]
    async fn collects_out_of_order_completions_in_input_order() {
        let collector = ResultCollector::new(3);
        collector.on_result(success(2)).await;
        collector.on_result(success(0)).await;
        assert!(!collector.is_complete());
        collector.on_result(success(1)).await;
        assert!(collector.is_complete());
        let result = collector.finalize().unwrap();
        assert_eq!(3, result.len());
        for (index, slot) in result.iter().enumerate() {
            assert_eq!(index, slot.index());
        }
    }

    #[tokio::test]
    async fn duplicate_results_are_ignored() {
        let collector = ResultCollector::new(2);
        collector.on_result(success(0)).await;
        collector
            .on_result(ProcessResult::Failure {
                index: 0,
                reason: FailureReason::Cancelled,
            })
            .await;
        assert_eq!(1, collector.resolved());
        collector.on_result(success(1)).await;
        let result = collector.finalize().unwrap();
        // The first result for the slot wins.
        assert!(result.get(0).unwrap().is_success());
    }

    #[tokio::test]
    async fn finalize_before_completion_is_an_error() {
        let collector = ResultCollector::new(2);
        collector.on_result(success(0)).await;
        let error = collector.finalize().unwrap_err();
        assert!(matches!(
            error,
            BatchError::BatchIncomplete {
                resolved: 1,
                total: 2
            }
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_immediately_complete() {
        let collector = ResultCollector::new(0);
        assert!(collector.is_complete());
        let result = collector.finalize().unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_result_is_dropped() {
        let collector = ResultCollector::new(1);
        collector.on_result(success(5)).await;
        assert_eq!(0, collector.resolved());
    }

    #[tokio::test]
    async fn concurrent_on_result() {
        let collector = std::sync::Arc::new(ResultCollector::new(64));
        let mut handles = Vec::new();
        for index in 0..64 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                collector.on_result(success(index)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(collector.is_complete());
    }
}
