use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::types::error::NoSuchKey;
use aws_smithy_runtime_api::http::Response as SmithyResponse;
use aws_smithy_runtime_api::http::StatusCode as SmithyStatusCode;
use bytes::Bytes;

use crate::error::FetchError;
use crate::models::BatchConfig;
use crate::s3_client::{ObjectStore, ObjectStoreFactory};

/// Create a BatchConfig with small worker bounds.
pub(crate) fn get_test_batch_config() -> BatchConfig {
    BatchConfig {
        dataset: "aia_0094".to_string(),
        start: "2021-01-01T00:00:00Z".parse().unwrap(),
        stop: "2021-01-04T00:00:00Z".parse().unwrap(),
        min_workers: 1,
        max_workers: 4,
        drain_timeout: Duration::from_secs(5),
        worker_hints: None,
    }
}

/// Build a FetchError matching a missing object.
pub(crate) fn no_such_key_error() -> FetchError {
    // Jump through the hoops to create an SdkError.
    let status: SmithyStatusCode = 404.try_into().unwrap();
    let response = SmithyResponse::new(status, "body".into());
    let no_such_key = NoSuchKey::builder().build();
    let get_object_error = GetObjectError::NoSuchKey(no_such_key);
    SdkError::service_error(get_object_error, response).into()
}

/// An [ObjectStore] serving objects from a shared in-memory map.
///
/// Each handle tracks whether it has already served a fetch, so tests can
/// assert that scoped handles are single-use.
pub(crate) struct InMemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    used: AtomicBool,
    reused_handles: Arc<AtomicUsize>,
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, FetchError> {
        if self.used.swap(true, Ordering::SeqCst) {
            self.reused_handles.fetch_add(1, Ordering::SeqCst);
        }
        let objects = self.objects.lock().unwrap();
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|data| Bytes::from(data.clone()))
            .ok_or_else(no_such_key_error)
    }
}

/// An [ObjectStoreFactory] over an in-memory object map, with counters for
/// asserting the scoped single-use contract.
pub(crate) struct InMemoryStoreFactory {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    scoped_calls: AtomicUsize,
    reused_handles: Arc<AtomicUsize>,
}

impl InMemoryStoreFactory {
    pub(crate) fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            scoped_calls: AtomicUsize::new(0),
            reused_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an object to the store.
    pub(crate) fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    /// Number of scoped handles constructed.
    pub(crate) fn scoped_calls(&self) -> usize {
        self.scoped_calls.load(Ordering::SeqCst)
    }

    /// Number of handles that served more than one fetch.
    pub(crate) fn reused_handles(&self) -> usize {
        self.reused_handles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreFactory for InMemoryStoreFactory {
    async fn scoped(&self) -> Box<dyn ObjectStore> {
        self.scoped_calls.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryStore {
            objects: self.objects.clone(),
            used: AtomicBool::new(false),
            reused_handles: self.reused_handles.clone(),
        })
    }
}

/// Format one 80-character header card.
pub(crate) fn fits_card(keyword: &str, value: &str) -> String {
    format!("{:<8}= {:<70}", keyword, value)
}

/// Assemble header cards plus END into padded 2880-byte blocks.
pub(crate) fn fits_header(cards: &[String]) -> Vec<u8> {
    let mut header = String::new();
    for card in cards {
        header.push_str(card);
    }
    header.push_str(&format!("{:<80}", "END"));
    while header.len() % 2880 != 0 {
        header.push(' ');
    }
    header.into_bytes()
}

/// Pad a data section to a whole number of 2880-byte blocks.
fn pad_data(mut data: Vec<u8>) -> Vec<u8> {
    while data.len() % 2880 != 0 {
        data.push(0);
    }
    data
}

/// Encode f32 values as a big-endian FITS data section.
fn f32_data(values: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 4);
    for value in values {
        data.extend_from_slice(&value.to_be_bytes());
    }
    pad_data(data)
}

/// Build a single-HDU FITS file with an f32 payload.
pub(crate) fn fits_f32_image(t_obs: Option<&str>, values: &[f32]) -> Bytes {
    let mut cards = vec![
        fits_card("SIMPLE", "T"),
        fits_card("BITPIX", "-32"),
        fits_card("NAXIS", "1"),
        fits_card("NAXIS1", &values.len().to_string()),
    ];
    if let Some(t_obs) = t_obs {
        cards.push(fits_card("T_OBS", &format!("'{}'", t_obs)));
    }
    let mut bytes = fits_header(&cards);
    bytes.extend_from_slice(&f32_data(values));
    bytes.into()
}

/// Build a FITS file with a header-only primary HDU and an image extension,
/// the usual layout for instrument data.
pub(crate) fn fits_with_image_extension(t_obs: &str, values: &[f32]) -> Bytes {
    let primary = vec![
        fits_card("SIMPLE", "T"),
        fits_card("BITPIX", "8"),
        fits_card("NAXIS", "0"),
    ];
    let extension = vec![
        fits_card("XTENSION", "'IMAGE   '"),
        fits_card("BITPIX", "-32"),
        fits_card("NAXIS", "1"),
        fits_card("NAXIS1", &values.len().to_string()),
        fits_card("T_OBS", &format!("'{}'", t_obs)),
    ];
    let mut bytes = fits_header(&primary);
    bytes.extend_from_slice(&fits_header(&extension));
    bytes.extend_from_slice(&f32_data(values));
    bytes.into()
}
