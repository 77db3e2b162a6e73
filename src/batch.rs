//! The batch-run entry point.
//!
//! Wires the catalog, worker pool and collector together: look up the object
//! list, scatter it over the pool, gather completions into an input-ordered
//! result. The pool is shut down on every exit path so no worker resources
//! outlive the run.

use std::sync::Arc;

use tokio_stream::StreamExt;
use validator::Validate;

use crate::catalog::Catalog;
use crate::collector::ResultCollector;
use crate::compute::Compute;
use crate::error::BatchError;
use crate::fits::PayloadParser;
use crate::models::{BatchConfig, BatchResult, Task};
use crate::pool::{PoolSettings, WorkerPool};
use crate::processor::{ItemProcessor, Process};
use crate::s3_client::ObjectStoreFactory;

/// Run one batch: catalog lookup, scatter, gather.
///
/// Returns the input-ordered [BatchResult], one slot per catalogued object.
/// Per-item failures are recorded in their slots; only batch-fatal errors
/// (invalid configuration, catalog failure, a pool that cannot start) are
/// returned as errors.
///
/// # Arguments
///
/// * `config`: Batch run configuration
/// * `catalog`: Catalog used to resolve the object list
/// * `store_factory`: Factory for scoped object store handles
/// * `parser`: Parser for raw object bytes
/// * `compute`: The injected reduction
pub async fn run_batch(
    config: &BatchConfig,
    catalog: &dyn Catalog,
    store_factory: Arc<dyn ObjectStoreFactory>,
    parser: Arc<dyn PayloadParser>,
    compute: Arc<dyn Compute>,
) -> Result<BatchResult, BatchError> {
    config.validate()?;
    let objects = catalog
        .list_objects(&config.dataset, config.start, config.stop)
        .await?;
    let tasks: Vec<Task> = objects
        .into_iter()
        .enumerate()
        .map(|(index, object)| Task { index, object })
        .collect();
    tracing::info!(
        dataset = %config.dataset,
        tasks = tasks.len(),
        min_workers = config.min_workers,
        max_workers = config.max_workers,
        "starting batch"
    );
    let processor = Arc::new(ItemProcessor::new(store_factory, parser, compute));
    run_tasks(tasks, processor, config).await
}

/// Scatter prepared tasks over a worker pool and gather the results.
pub async fn run_tasks(
    tasks: Vec<Task>,
    processor: Arc<dyn Process>,
    config: &BatchConfig,
) -> Result<BatchResult, BatchError> {
    let total = tasks.len();
    let collector = ResultCollector::new(total);
    let (pool, mut completions) = WorkerPool::start(processor, PoolSettings::from(config)).await?;
    pool.submit_batch(tasks).await;

    while !collector.is_complete() {
        match completions.next().await {
            Some(result) => collector.on_result(result).await,
            None => break,
        }
    }

    pool.shutdown(config.drain_timeout).await;

    // Pick up cancellations emitted during shutdown; the stream has
    // terminated once the pool closes the completion channel.
    while let Some(result) = completions.next().await {
        collector.on_result(result).await;
    }

    let result = collector.finalize()?;
    tracing::info!(
        tasks = result.len(),
        failures = result.failures(),
        "batch complete"
    );
    Ok(result)
}
