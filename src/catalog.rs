//! Catalog lookup: mapping a logical dataset name and time range to an
//! ordered list of object identifiers.
//!
//! A catalog failure is batch-fatal; it aborts the run before any tasks are
//! created.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CatalogError;
use crate::s3_client::ObjectStoreFactory;

/// Trait for catalog implementations.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return the ordered object identifiers for `dataset` within the time
    /// range `[start, stop]` (inclusive), in timestamp order.
    async fn list_objects(
        &self,
        dataset: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Vec<String>, CatalogError>;

    /// Return the full time span covered by `dataset`.
    async fn dataset_span(
        &self,
        dataset: &str,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), CatalogError>;
}

/// One file entry in the manifest.
#[derive(Debug, Deserialize)]
struct FileEntry {
    /// Observation timestamp of the file.
    timestamp: DateTime<Utc>,
    /// Object identifier, an `s3://bucket/key` URL.
    key: String,
}

/// One dataset entry in the manifest.
#[derive(Debug, Deserialize)]
struct DatasetEntry {
    /// Earliest observation in the dataset.
    start_date: DateTime<Utc>,
    /// Latest observation in the dataset.
    stop_date: DateTime<Utc>,
    /// Files belonging to the dataset.
    files: Vec<FileEntry>,
}

/// The catalog manifest document.
#[derive(Debug, Deserialize)]
struct Manifest {
    /// Datasets by logical name.
    datasets: HashMap<String, DatasetEntry>,
}

/// A [Catalog] backed by a JSON manifest object held in the object store.
///
/// The manifest is fetched through a scoped store handle on every lookup, the
/// same single-use discipline the item processor follows.
pub struct ManifestCatalog {
    /// Factory for scoped object store handles.
    factory: Arc<dyn ObjectStoreFactory>,
    /// Bucket holding the manifest object.
    bucket: String,
    /// Key of the manifest object.
    manifest_key: String,
}

impl ManifestCatalog {
    /// Return a new ManifestCatalog.
    ///
    /// # Arguments
    ///
    /// * `factory`: Factory for scoped object store handles
    /// * `bucket`: Bucket holding the manifest object
    /// * `manifest_key`: Key of the manifest object
    pub fn new(factory: Arc<dyn ObjectStoreFactory>, bucket: &str, manifest_key: &str) -> Self {
        Self {
            factory,
            bucket: bucket.to_string(),
            manifest_key: manifest_key.to_string(),
        }
    }

    /// Fetch and deserialise the manifest.
    async fn fetch_manifest(&self) -> Result<Manifest, CatalogError> {
        let store = self.factory.scoped().await;
        let raw = store
            .fetch(&self.bucket, &self.manifest_key)
            .await
            .map_err(CatalogError::Unavailable)?;
        let manifest = serde_json::from_slice(&raw)?;
        Ok(manifest)
    }
}

#[async_trait]
impl Catalog for ManifestCatalog {
    async fn list_objects(
        &self,
        dataset: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Vec<String>, CatalogError> {
        if start >= stop {
            return Err(CatalogError::InvalidRange { start, stop });
        }
        let manifest = self.fetch_manifest().await?;
        let entry = manifest
            .datasets
            .get(dataset)
            .ok_or_else(|| CatalogError::DatasetNotFound(dataset.to_string()))?;
        let mut files: Vec<&FileEntry> = entry
            .files
            .iter()
            .filter(|file| file.timestamp >= start && file.timestamp <= stop)
            .collect();
        files.sort_by_key(|file| file.timestamp);
        tracing::info!(
            dataset,
            files = files.len(),
            "catalog lookup resolved object list"
        );
        Ok(files.into_iter().map(|file| file.key.clone()).collect())
    }

    async fn dataset_span(
        &self,
        dataset: &str,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), CatalogError> {
        let manifest = self.fetch_manifest().await?;
        let entry = manifest
            .datasets
            .get(dataset)
            .ok_or_else(|| CatalogError::DatasetNotFound(dataset.to_string()))?;
        Ok((entry.start_date, entry.stop_date))
    }
}
