use std::future::Future;

use bytes::Bytes;

use crate::contracts::error::StorageError;
use crate::contracts::Batch;

/// Minimal object store surface the uploader needs (S3).
///
/// Implementations classify their failures: `StorageError::Transient` for
/// failures worth retrying, anything else is final.
pub trait ObjectStore: Send + Sync {
    /// Writes a single object.
    fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Verifies the destination bucket exists and is reachable.
    fn head_bucket(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Bucket name, for logging.
    fn bucket(&self) -> &str;
}

/// Destination for detached batches.
pub trait Uploader: Send + Sync {
    /// Persists a batch and returns the key it was written under.
    ///
    /// Retries happen inside; an `Err` is terminal and the batch is dropped.
    fn store(&self, batch: &Batch) -> impl Future<Output = Result<String, StorageError>> + Send;
}
