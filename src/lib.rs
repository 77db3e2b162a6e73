//! This crate provides a scatter/gather batch-processing engine for remote
//! observation data. It fetches a time-ordered catalog of S3 objects, parses
//! each object's numeric payload, applies an injected reduction and gathers
//! the per-item results into a single input-ordered batch result. A failing
//! item records a failure in its slot without aborting the rest of the batch.
//!
//! The engine is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime, hosting the
//!   elastic worker pool.
//! * [Serde](serde) performs (de)serialisation of the catalog manifest and
//!   the persisted batch results.
//! * [AWS SDK for S3](aws-sdk-s3) is used to interact with S3-compatible
//!   object stores.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays
//!   used in numerical computation.

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod collector;
pub mod compute;
pub mod error;
pub mod fits;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod processor;
pub mod s3_client;
pub mod sink;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
