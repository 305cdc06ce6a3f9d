mod key;
mod retry;
mod s3;
mod uploader;

pub use key::{generate_storage_key, storage_key};
pub use retry::{is_retryable_s3_error, RetryConfig};
pub use s3::S3ObjectStore;
pub use uploader::{ObjectStoreUploader, JSON_CONTENT_TYPE};
