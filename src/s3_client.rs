//! A simplified S3 client that supports downloading and listing objects.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use crate::dataset::Timestamp;
use crate::error::RetrievalError;
use crate::object_store::{ObjectInfo, ObjectStore};

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;
use url::Url;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
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

    /// Access key credentials if both parts are present, otherwise anonymous access.
    pub fn from_options(access_key: Option<&str>, secret_key: Option<&str>) -> Self {
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Self::access_key(access_key, secret_key),
            _ => S3Credentials::None,
        }
    }
}

/// S3 client object bound to a single bucket.
#[derive(Clone, Debug)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
    /// Bucket holding the source objects.
    bucket: String,
    /// Limit on the duration of each S3 call.
    timeout: Duration,
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `region`: AWS region of the bucket
    /// * `endpoint`: Optional object storage API URL, for S3-compatible stores
    /// * `credentials`: Object storage account credentials
    /// * `timeout`: Limit on the duration of each call
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&Url>,
        credentials: S3Credentials,
        timeout: Duration,
    ) -> Self {
        let builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Some(Region::new(region.to_string())));
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
        // S3-compatible stores generally need path-style addressing.
        let builder = match endpoint {
            Some(url) => builder.endpoint_url(url.to_string()).force_path_style(true),
            None => builder,
        };
        let client = Client::from_conf(builder.build());
        Self {
            client,
            bucket: bucket.to_string(),
            timeout,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run an S3 call, failing with [RetrievalError::Timeout] if it takes too long.
    async fn with_timeout<T, F>(&self, key: &str, call: F) -> Result<T, RetrievalError>
    where
        F: Future<Output = Result<T, RetrievalError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RetrievalError::Timeout {
                key: key.to_string(),
            })?
    }

    /// Downloads an object from object storage and returns the data as Bytes
    ///
    /// # Arguments
    ///
    /// * `key`: Name of the object in the bucket
    #[tracing::instrument(level = "DEBUG", skip(self), fields(bucket = %self.bucket))]
    pub async fn download_object(&self, key: &str) -> Result<Bytes, RetrievalError> {
        self.with_timeout(key, async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .instrument(tracing::Span::current())
                .await
                .map_err(|err| {
                    let not_found = matches!(err.as_service_error(), Some(GetObjectError::NoSuchKey(_)));
                    retrieval_error(key, err, not_found)
                })?;
            let data = response
                .body
                .collect()
                .instrument(tracing::Span::current())
                .await
                .map_err(|err| RetrievalError::Transport {
                    key: key.to_string(),
                    message: err.to_string(),
                })?
                .into_bytes();
            tracing::debug!(size = data.len(), "downloaded object");
            Ok(data)
        })
        .await
    }

    /// Lists the objects under a prefix, following continuation tokens.
    ///
    /// # Arguments
    ///
    /// * `prefix`: Key prefix
    #[tracing::instrument(level = "DEBUG", skip(self), fields(bucket = %self.bucket))]
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RetrievalError> {
        let mut objects = Vec::new();
        let mut continuation_token = None;
        loop {
            let response = self
                .with_timeout(prefix, async {
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .set_continuation_token(continuation_token.take())
                        .send()
                        .instrument(tracing::Span::current())
                        .await
                        .map_err(|err| {
                            let not_found = matches!(
                                err.as_service_error(),
                                Some(ListObjectsV2Error::NoSuchBucket(_))
                            );
                            retrieval_error(prefix, err, not_found)
                        })
                })
                .await?;
            for object in response.contents() {
                if let Some(key) = object.key() {
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        size: u64::try_from(object.size().unwrap_or_default()).unwrap_or_default(),
                        last_modified: object
                            .last_modified()
                            .and_then(|modified| modified.to_millis().ok())
                            .map(Timestamp),
                    });
                }
            }
            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or_default() => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        tracing::debug!(count = objects.len(), "listed objects");
        Ok(objects)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn get(&self, key: &str) -> Result<Bytes, RetrievalError> {
        self.download_object(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RetrievalError> {
        self.list_objects(prefix).await
    }
}

/// Classify an SDK error.
///
/// Quite a lot of service errors end up unmodelled, so fall back to the error code and then the
/// HTTP status.
///
/// # Arguments
///
/// * `key`: Object key or prefix of the call
/// * `error`: Error returned by the SDK
/// * `not_found`: Whether the modelled service error means the object does not exist
fn retrieval_error<E>(key: &str, error: SdkError<E>, not_found: bool) -> RetrievalError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let key = key.to_string();
    match &error {
        SdkError::TimeoutError(_) => RetrievalError::Timeout { key },
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            RetrievalError::Timeout { key }
        }
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            match context.err().code() {
                _ if not_found => RetrievalError::NotFound { key },
                Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => {
                    RetrievalError::NotFound { key }
                }
                Some("AccessDenied")
                | Some("Forbidden")
                | Some("InvalidAccessKeyId")
                | Some("SignatureDoesNotMatch") => RetrievalError::AccessDenied { key },
                Some("RequestTimeout") => RetrievalError::Timeout { key },
                _ if status == 404 => RetrievalError::NotFound { key },
                _ if status == 403 => RetrievalError::AccessDenied { key },
                _ => RetrievalError::Transport {
                    key,
                    message: DisplayErrorContext(&error).to_string(),
                },
            }
        }
        _ => RetrievalError::Transport {
            key,
            message: DisplayErrorContext(&error).to_string(),
        },
    }
}
