//! Command Line Interface (CLI) arguments.

use chrono::{DateTime, Utc};
use clap::Parser;
use url::Url;

/// Gatherist command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// URL of the S3-compatible object store
    #[arg(long, env = "GATHERIST_S3_URL")]
    pub s3_url: Url,
    /// Bucket holding the catalog manifest object
    #[arg(long, env = "GATHERIST_MANIFEST_BUCKET")]
    pub manifest_bucket: String,
    /// Key of the catalog manifest object
    #[arg(
        long,
        default_value = "catalog/manifest.json",
        env = "GATHERIST_MANIFEST_KEY"
    )]
    pub manifest_key: String,
    /// Logical dataset name to process
    #[arg(long, env = "GATHERIST_DATASET")]
    pub dataset: String,
    /// Start of the time range (RFC 3339); defaults to the dataset's earliest observation
    #[arg(long, env = "GATHERIST_START")]
    pub start: Option<DateTime<Utc>>,
    /// End of the time range (RFC 3339); defaults to the dataset's latest observation
    #[arg(long, env = "GATHERIST_STOP")]
    pub stop: Option<DateTime<Utc>>,
    /// Lower bound on the worker count
    #[arg(long, default_value_t = 1, env = "GATHERIST_MIN_WORKERS")]
    pub min_workers: usize,
    /// Upper bound on the worker count
    #[arg(long, default_value_t = 8, env = "GATHERIST_MAX_WORKERS")]
    pub max_workers: usize,
    /// Maximum time in seconds to wait for in-flight items to resolve during shutdown
    #[arg(long, default_value_t = 60, env = "GATHERIST_DRAIN_TIMEOUT")]
    pub drain_timeout: u64,
    /// Path of the JSON Lines results file
    #[arg(long, default_value = "results.jsonl", env = "GATHERIST_OUTPUT_FILE")]
    pub output_file: String,
    /// Optional S3 access key
    #[arg(long, env = "GATHERIST_S3_ACCESS_KEY")]
    pub access_key: Option<String>,
    /// Optional S3 secret key
    #[arg(long, env = "GATHERIST_S3_SECRET_KEY")]
    pub secret_key: Option<String>,
    /// Opaque worker provisioning hints as a JSON document, passed through to the scale provider
    #[arg(long, env = "GATHERIST_WORKER_HINTS")]
    pub worker_hints: Option<String>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
