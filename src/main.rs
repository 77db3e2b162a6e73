use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gatherist::batch;
use gatherist::catalog::{Catalog, ManifestCatalog};
use gatherist::cli;
use gatherist::compute::MeanCompute;
use gatherist::fits::FitsParser;
use gatherist::metrics::register_metrics;
use gatherist::models::BatchConfig;
use gatherist::s3_client::{S3Credentials, S3StoreFactory};
use gatherist::sink::{JsonLinesSink, ResultSink};
use gatherist::tracing::init_tracing;

#[tokio::main]
async fn main() {
    let args = cli::parse();
    init_tracing();
    register_metrics();

    let credentials = match (&args.access_key, &args.secret_key) {
        (Some(access_key), Some(secret_key)) => S3Credentials::access_key(access_key, secret_key),
        (None, None) => S3Credentials::None,
        _ => {
            eprintln!("--access-key and --secret-key must be provided together");
            std::process::exit(1);
        }
    };
    let worker_hints = match &args.worker_hints {
        Some(hints) => match serde_json::from_str(hints) {
            Ok(value) => Some(value),
            Err(error) => {
                eprintln!("invalid --worker-hints JSON: {}", error);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let store_factory = Arc::new(S3StoreFactory::new(args.s3_url.clone(), credentials));
    let catalog = ManifestCatalog::new(
        store_factory.clone(),
        &args.manifest_bucket,
        &args.manifest_key,
    );

    // An unspecified time range bound defaults to the dataset's own span.
    let (start, stop) = match (args.start, args.stop) {
        (Some(start), Some(stop)) => (start, stop),
        (start, stop) => match catalog.dataset_span(&args.dataset).await {
            Ok((span_start, span_stop)) => {
                (start.unwrap_or(span_start), stop.unwrap_or(span_stop))
            }
            Err(error) => {
                eprintln!("failed to resolve time range for {}: {}", args.dataset, error);
                std::process::exit(1);
            }
        },
    };

    let config = BatchConfig {
        dataset: args.dataset.clone(),
        start,
        stop,
        min_workers: args.min_workers,
        max_workers: args.max_workers,
        drain_timeout: Duration::from_secs(args.drain_timeout),
        worker_hints,
    };

    let result = match batch::run_batch(
        &config,
        &catalog,
        store_factory,
        Arc::new(FitsParser),
        Arc::new(MeanCompute),
    )
    .await
    {
        Ok(result) => result,
        Err(error) => {
            eprintln!("batch failed: {}", error);
            std::process::exit(1);
        }
    };

    tracing::info!(
        dataset = %args.dataset,
        tasks = result.len(),
        failures = result.failures(),
        "batch run finished"
    );

    // The in-memory result survives a sink failure; report it and move on.
    let sink = JsonLinesSink::new(Path::new(&args.output_file));
    if let Err(error) = sink.store(&result).await {
        tracing::error!(path = %args.output_file, %error, "failed to store batch result");
        std::process::exit(1);
    }
}
