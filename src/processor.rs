//! Per-item processing: fetch, parse and reduce one object.
//!
//! The processor is stateless across invocations. Every invocation constructs
//! a fresh scoped store handle and discards it before returning; no client or
//! session object ever crosses between concurrent invocations. Failures at
//! any stage are converted into [ProcessResult::Failure] values and never
//! propagate past the worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{event, Level};

use crate::compute::Compute;
use crate::fits::PayloadParser;
use crate::models::{FailureReason, ProcessResult, Task};
use crate::s3_client::{parse_s3_url, ObjectStoreFactory};

/// Trait for anything that resolves one task to a terminal result.
///
/// This is the seam between the worker pool and the item processing logic.
#[async_trait]
pub trait Process: Send + Sync {
    /// Resolve one task. Infallible: failures are data in the result.
    async fn process(&self, task: &Task) -> ProcessResult;
}

/// The standard item processor: fetch raw bytes, parse the header and
/// payload, apply the injected compute function.
pub struct ItemProcessor {
    /// Factory for scoped object store handles, one per invocation.
    store_factory: Arc<dyn ObjectStoreFactory>,
    /// Parser turning raw bytes into a timestamp and payload array.
    parser: Arc<dyn PayloadParser>,
    /// The injected reduction.
    compute: Arc<dyn Compute>,
}

impl ItemProcessor {
    /// Return a new ItemProcessor.
    pub fn new(
        store_factory: Arc<dyn ObjectStoreFactory>,
        parser: Arc<dyn PayloadParser>,
        compute: Arc<dyn Compute>,
    ) -> Self {
        Self {
            store_factory,
            parser,
            compute,
        }
    }

    /// Process one task, surfacing the failure stage on error.
    async fn process_inner(&self, task: &Task) -> Result<ProcessResult, FailureReason> {
        let (bucket, key) = parse_s3_url(&task.object).map_err(|error| {
            event!(Level::WARN, index = task.index, %error, "invalid object identifier");
            FailureReason::Fetch
        })?;

        // Scoped handle: constructed here, dropped before this call returns.
        let store = self.store_factory.scoped().await;
        let raw = store.fetch(bucket, key).await.map_err(|error| {
            event!(Level::WARN, index = task.index, object = %task.object, %error, "fetch failed");
            FailureReason::Fetch
        })?;
        drop(store);

        let payload = self.parser.parse(&raw).map_err(|error| {
            event!(Level::WARN, index = task.index, object = %task.object, %error, "parse failed");
            FailureReason::Parse
        })?;

        let metric = self
            .compute
            .apply(&payload.data.view())
            .map_err(|error| {
                event!(Level::WARN, index = task.index, object = %task.object, %error, "compute failed");
                FailureReason::Compute
            })?;

        Ok(ProcessResult::Success {
            index: task.index,
            timestamp: payload.timestamp,
            metric,
        })
    }
}

#[async_trait]
impl Process for ItemProcessor {
    async fn process(&self, task: &Task) -> ProcessResult {
        match self.process_inner(task).await {
            Ok(result) => result,
            Err(reason) => ProcessResult::Failure {
                index: task.index,
                reason,
            },
        }
    }
}
