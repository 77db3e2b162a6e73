//! Error handling.
//!
//! The taxonomy distinguishes batch-fatal errors ([BatchError]) from per-item
//! errors. Per-item errors ([FetchError], [ParseError], [ComputeError]) are
//! caught at the item processor boundary and converted into
//! [FailureReason](crate::models::FailureReason) slots in the batch result;
//! they never abort the surrounding batch.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Batch-fatal and infrastructure error type.
///
/// An error of this type aborts or fails the whole batch run. Per-item
/// failures are not represented here; they are data in the batch result.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Catalog lookup failed before any tasks were created.
    #[error("catalog lookup failed")]
    Catalog(#[from] CatalogError),

    /// Batch configuration is not valid.
    #[error("batch configuration is not valid")]
    ConfigValidation(#[from] validator::ValidationErrors),

    /// The collector was finalised before every task resolved.
    #[error("batch finalised with {resolved} of {total} tasks resolved")]
    BatchIncomplete { resolved: usize, total: usize },

    /// The worker pool could not start any worker at all.
    #[error("worker pool failed to start any worker")]
    PoolStart,

    /// Error persisting the batch result.
    #[error("failed to store batch result")]
    Sink(#[from] SinkError),
}

/// Error looking up a dataset in the catalog.
///
/// Catalog failures abort batch construction; they are never per-item
/// failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested dataset does not exist.
    #[error("dataset {0} not found in catalog")]
    DatasetNotFound(String),

    /// The requested time range is not valid.
    #[error("invalid time range: start {start} is not before stop {stop}")]
    InvalidRange {
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    },

    /// The catalog manifest could not be retrieved.
    #[error("catalog unavailable")]
    Unavailable(#[source] FetchError),

    /// The catalog manifest could not be deserialised.
    #[error("malformed catalog manifest")]
    MalformedManifest(#[from] serde_json::Error),
}

/// Error fetching an object from storage.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The object or its bucket does not exist.
    #[error("object not found in S3 storage")]
    ObjectNotFound(#[source] SdkError<GetObjectError>),

    /// The credentials were rejected by the object store.
    #[error("access to S3 storage denied")]
    AccessDenied(#[source] SdkError<GetObjectError>),

    /// A transient network or service failure.
    #[error("transient error retrieving object from S3 storage")]
    Transient(#[source] SdkError<GetObjectError>),

    /// Error reading object data from S3.
    #[error("error receiving object from S3 storage")]
    ByteStream(#[from] ByteStreamError),

    /// Missing Content-Length header in S3 response.
    #[error("S3 response missing Content-Length header")]
    ContentLengthMissing,

    /// The object identifier is not a valid `s3://bucket/key` URL.
    #[error("invalid object URL {url}")]
    InvalidObjectUrl { url: String },

    /// Error converting between integer types.
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl From<SdkError<GetObjectError>> for FetchError {
    /// Categorise an AWS SDK GetObject error.
    ///
    /// Quite a lot of error cases end up as unhandled in the SDK. Attempt to
    /// determine the category from the error code.
    fn from(error: SdkError<GetObjectError>) -> Self {
        match &error {
            SdkError::ServiceError(service_error) => match service_error.err() {
                GetObjectError::NoSuchKey(_) => FetchError::ObjectNotFound(error),
                get_obj_error => match get_obj_error.code() {
                    Some("NoSuchBucket") => FetchError::ObjectNotFound(error),
                    Some("InvalidAccessKeyId")
                    | Some("SignatureDoesNotMatch")
                    | Some("AccessDenied") => FetchError::AccessDenied(error),
                    _ => FetchError::Transient(error),
                },
            },
            _ => FetchError::Transient(error),
        }
    }
}

/// Error parsing structured bytes into a timestamp and payload array.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The data ended inside a header block.
    #[error("truncated header block at offset {offset}")]
    Truncated { offset: usize },

    /// A required header card is absent.
    #[error("missing required header card {card}")]
    MissingCard { card: &'static str },

    /// A header card holds an unusable value.
    #[error("invalid value {value} for header card {card}")]
    InvalidCard { card: &'static str, value: String },

    /// The element type is not a supported floating point BITPIX.
    #[error("unsupported BITPIX {0}")]
    UnsupportedBitpix(i64),

    /// The data section is shorter than the header promised.
    #[error("payload holds {actual} bytes, header promised {expected}")]
    PayloadTooShort { expected: usize, actual: usize },

    /// No HDU in the file carries payload data.
    #[error("no HDU with payload data")]
    NoPayload,
}

/// Error from the injected compute function.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Attempt to perform an invalid operation on an empty payload.
    #[error("cannot perform {operation} on empty payload")]
    EmptyPayload { operation: &'static str },

    /// The computation produced a non-finite value.
    #[error("{operation} produced a non-finite result")]
    NonFinite { operation: &'static str },
}

/// Error durably persisting a batch result.
///
/// A sink failure is reported to the caller; it does not invalidate the
/// in-memory batch result.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Error serialising a result record.
    #[error("failed to serialise batch result")]
    Serialise(#[from] serde_json::Error),

    /// Error writing the serialised result.
    #[error("failed to write batch result")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    use aws_sdk_s3::types::error::NoSuchKey;
    use aws_smithy_runtime_api::http::Response as SmithyResponse;
    use aws_smithy_runtime_api::http::StatusCode as SmithyStatusCode;
    use aws_smithy_types::error::ErrorMetadata as SmithyError;

    fn get_smithy_response() -> SmithyResponse {
        let sdk_body = "body";
        let status: SmithyStatusCode = 400.try_into().unwrap();
        SmithyResponse::new(status, sdk_body.into())
    }

    fn get_object_error_with_code(code: &str) -> SdkError<GetObjectError> {
        let smithy_error = SmithyError::builder()
            .message("fake smithy error")
            .code(code)
            .build();
        let get_object_error = GetObjectError::generic(smithy_error);
        SdkError::service_error(get_object_error, get_smithy_response())
    }

    #[test]
    fn fetch_error_no_such_key() {
        // Jump through the hoops to create an SdkError.
        let no_such_key = NoSuchKey::builder().build();
        let get_object_error = GetObjectError::NoSuchKey(no_such_key);
        let sdk_error = SdkError::service_error(get_object_error, get_smithy_response());
        let error = FetchError::from(sdk_error);
        assert!(matches!(error, FetchError::ObjectNotFound(_)));
    }

    #[test]
    fn fetch_error_no_such_bucket() {
        let error = FetchError::from(get_object_error_with_code("NoSuchBucket"));
        assert!(matches!(error, FetchError::ObjectNotFound(_)));
    }

    #[test]
    fn fetch_error_access_denied() {
        for code in ["InvalidAccessKeyId", "SignatureDoesNotMatch", "AccessDenied"] {
            let error = FetchError::from(get_object_error_with_code(code));
            assert!(matches!(error, FetchError::AccessDenied(_)));
        }
    }

    #[test]
    fn fetch_error_unknown_code_is_transient() {
        let error = FetchError::from(get_object_error_with_code("SlowDown"));
        assert!(matches!(error, FetchError::Transient(_)));
    }

    #[test]
    fn fetch_error_byte_stream() {
        // ByteStreamError provides a From impl for std::io::Error.
        let error = FetchError::ByteStream(
            std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into(),
        );
        assert_eq!(
            "error receiving object from S3 storage",
            error.to_string()
        );
    }

    #[test]
    fn batch_error_display() {
        let error = BatchError::BatchIncomplete {
            resolved: 2,
            total: 3,
        };
        assert_eq!(
            "batch finalised with 2 of 3 tasks resolved",
            error.to_string()
        );
    }

    #[test]
    fn parse_error_display() {
        let error = ParseError::UnsupportedBitpix(16);
        assert_eq!("unsupported BITPIX 16", error.to_string());
    }
}
