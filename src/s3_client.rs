//! A simplified S3 client that supports downloading whole objects.
//! It attempts to hide the complexities of working with the AWS SDK for S3.
//!
//! Clients here are scoped: one client is constructed per item invocation and
//! discarded at the end of it, never shared across concurrent workers. The
//! SDK's credential state is not safe to share across callers, so per-call
//! construction is a correctness requirement of the engine, not an
//! optimisation. There is deliberately no client reuse map.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::Instrument;
use url::Url;

use crate::error::FetchError;

/// Object storage account credentials.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    None,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

/// A handle on object storage scoped to a single operation.
///
/// Implementations must not share mutable state between handles; each handle
/// returned by an [ObjectStoreFactory] belongs exclusively to the invocation
/// that requested it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object and return its data as Bytes.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, FetchError>;
}

/// Factory for scoped object store handles.
///
/// Called once per item invocation; the handle is dropped when the invocation
/// ends.
#[async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    /// Construct a fresh scoped store handle.
    async fn scoped(&self) -> Box<dyn ObjectStore>;
}

/// Scoped S3 client object.
pub struct ScopedS3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
}

impl ScopedS3Client {
    /// Creates a ScopedS3Client object
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub async fn new(url: &Url, credentials: S3Credentials) -> Self {
        let region = Region::new("us-east-1");
        let builder = aws_sdk_s3::Config::builder().behavior_version(BehaviorVersion::latest());
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                builder.credentials_provider(credentials)
            }
            S3Credentials::None => builder,
        };
        let s3_config = builder
            .region(Some(region))
            .endpoint_url(url.to_string())
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for ScopedS3Client {
    /// Downloads an object from object storage and returns the data as Bytes
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::Span::current())
            .await?;
        // Fail if the content length header is missing.
        let content_length: usize = response
            .content_length()
            .ok_or(FetchError::ContentLengthMissing)?
            .try_into()?;

        // Iterate over the streaming response, copying data into a Vec<u8>.
        let mut buf = Vec::with_capacity(content_length);
        while let Some(bytes) = response
            .body
            .try_next()
            .instrument(tracing::Span::current())
            .await?
        {
            buf.extend_from_slice(&bytes)
        }
        // Return as Bytes.
        Ok(buf.into())
    }
}

/// Factory producing one [ScopedS3Client] per invocation.
pub struct S3StoreFactory {
    /// Object storage API URL.
    url: Url,
    /// Object storage account credentials.
    credentials: S3Credentials,
}

impl S3StoreFactory {
    /// Return a new S3StoreFactory.
    pub fn new(url: Url, credentials: S3Credentials) -> Self {
        Self { url, credentials }
    }
}

#[async_trait]
impl ObjectStoreFactory for S3StoreFactory {
    async fn scoped(&self) -> Box<dyn ObjectStore> {
        Box::new(ScopedS3Client::new(&self.url, self.credentials.clone()).await)
    }
}

/// Extract the bucket name and object key from an `s3://` URL.
///
/// e.g. `s3://mybucket/mykeypart1/mykeypart2/fname.fits` ->
/// (`mybucket`, `mykeypart1/mykeypart2/fname.fits`)
///
/// # Arguments
///
/// * `url`: Object URL to split
pub fn parse_s3_url(url: &str) -> Result<(&str, &str), FetchError> {
    let invalid = || FetchError::InvalidObjectUrl {
        url: url.to_string(),
    };
    let rest = url.strip_prefix("s3://").ok_or_else(invalid)?;
    let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
    if bucket.is_empty() || key.is_empty() {
        return Err(invalid());
    }
    Ok((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn make_access_key() -> S3Credentials {
        S3Credentials::access_key("user", "password")
    }

    #[tokio::test]
    async fn new() {
        let url = Url::parse("http://example.com").unwrap();
        ScopedS3Client::new(&url, make_access_key()).await;
    }

    #[tokio::test]
    async fn new_no_auth() {
        let url = Url::parse("http://example.com").unwrap();
        ScopedS3Client::new(&url, S3Credentials::None).await;
    }

    #[tokio::test]
    async fn factory_builds_scoped_clients() {
        let url = Url::parse("http://example.com").unwrap();
        let factory = S3StoreFactory::new(url, S3Credentials::None);
        factory.scoped().await;
        factory.scoped().await;
    }

    #[test]
    fn parse_s3_url_ok() {
        assert_eq!(
            ("mybucket", "path/to/fname.fits"),
            parse_s3_url("s3://mybucket/path/to/fname.fits").unwrap()
        );
    }

    #[test]
    fn parse_s3_url_no_scheme() {
        assert!(parse_s3_url("http://mybucket/key").is_err());
    }

    #[test]
    fn parse_s3_url_no_key() {
        assert!(parse_s3_url("s3://mybucket").is_err());
        assert!(parse_s3_url("s3://mybucket/").is_err());
    }

    #[test]
    fn parse_s3_url_no_bucket() {
        assert!(parse_s3_url("s3:///key").is_err());
    }
}
