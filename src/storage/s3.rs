use std::error::Error as StdError;

use aws_config::retry::RetryConfig as SdkRetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::config::S3Config;
use crate::contracts::{ObjectStore, StorageError};
use crate::storage::retry::is_retryable_s3_error;

/// S3-backed object store.
///
/// The SDK's own retries are disabled; `ObjectStoreUploader` owns the retry policy.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client with static credentials and the configured timeouts.
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "event-receiver-static",
        );

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.socket_timeout)
            .build();

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(timeouts)
            .retry_config(SdkRetryConfig::disabled())
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name.clone(),
        }
    }

    /// Wraps an existing client (e.g. one pointed at LocalStack).
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("PUT {}", key), e))?;
        Ok(())
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("HEAD {}", self.bucket), e))?;
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Maps an SDK failure onto transient or terminal.
///
/// Timeouts, dispatch and response failures are network trouble. Service errors
/// are transient on 5xx, 429 or a throttling code, terminal otherwise.
fn classify_sdk_error<E>(context: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or_default();
            status >= 500 || status == 429 || is_retryable_s3_error(code)
        }
        _ => false,
    };

    let message = format!("{}: {}", context, DisplayErrorContext(&err));
    if transient {
        StorageError::Transient(message)
    } else {
        StorageError::Terminal(message)
    }
}
