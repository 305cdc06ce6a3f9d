use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::contracts::{Batch, ObjectStore, StorageError, Uploader};
use crate::metrics::IngestMetrics;
use crate::storage::key::generate_storage_key;
use crate::storage::retry::RetryConfig;
use crate::upload_retry;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Uploads each batch as one JSON object, retrying transient failures.
///
/// The key is chosen once per batch, so every attempt targets the same object.
pub struct ObjectStoreUploader<O: ObjectStore> {
    store: O,
    retry_config: RetryConfig,
    metrics: Arc<IngestMetrics>,
}

impl<O: ObjectStore> ObjectStoreUploader<O> {
    pub fn new(store: O, retry_config: RetryConfig, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            store,
            retry_config,
            metrics,
        }
    }

    pub fn object_store(&self) -> &O {
        &self.store
    }
}

impl<O: ObjectStore> Uploader for ObjectStoreUploader<O> {
    async fn store(&self, batch: &Batch) -> Result<String, StorageError> {
        if batch.is_empty() {
            return Err(StorageError::InvalidInput("Cannot upload empty batch".into()));
        }

        let start = Instant::now();
        let key = generate_storage_key(&batch.tier);
        let body = Bytes::from(batch.to_json()?);

        let store = &self.store;
        let metrics = &self.metrics;
        upload_retry!(
            operation = {
                store
                    .put_object(&key, body.clone(), JSON_CONTENT_TYPE)
                    .await
            },
            retry_config = self.retry_config,
            context = format!("PUT s3://{}/{}", store.bucket(), key),
            on_retry = || metrics.record_retry(),
        )?;

        tracing::info!(
            tier = %batch.tier,
            events = batch.len(),
            bytes = body.len(),
            key = %key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stored batch"
        );

        Ok(key)
    }
}
