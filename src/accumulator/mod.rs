//! Per-tier batch accumulation.
//!
//! Each tier owns a buffer behind its own mutex; the tier map is a `DashMap` so
//! the first admit for a new tier never blocks other tiers. Flushing swaps the
//! buffer contents into a batch under the lock and queues it on the tier. A
//! single upload worker per tier drains that queue outside the lock, so a tier
//! has at most one upload in flight and batches leave in creation order.

mod inflight;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::config::BatchConfig;
use crate::contracts::{
    Batch, Event, FlushResult, LockResultExt, StorageError, TierStats, Uploader,
};
use crate::metrics::IngestMetrics;

pub use inflight::{InflightGuard, InflightUploads};

/// Outcome of a single `admit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The event is waiting in its tier buffer.
    Buffered,
    /// The event crossed the size threshold; the buffer was detached and queued for upload.
    Flushed { events: usize, estimated_bytes: usize },
}

/// A batch handed to the tier's upload queue.
struct Queued {
    events: usize,
    estimated_bytes: usize,
    /// No worker was running for the tier; the caller must start one.
    start_worker: bool,
}

#[derive(Default)]
struct TierBuffer {
    events: Vec<Event>,
    estimated_bytes: usize,
    next_sequence: u64,
    /// Detached batches waiting for the tier's upload worker.
    pending: VecDeque<Batch>,
    worker_active: bool,
}

impl TierBuffer {
    /// Moves the accumulated events into a new batch and resets the estimate.
    fn detach(&mut self, tier: &str) -> Option<Batch> {
        if self.events.is_empty() {
            return None;
        }
        let batch = Batch {
            tier: tier.to_string(),
            sequence: self.next_sequence,
            events: std::mem::take(&mut self.events),
            estimated_bytes: std::mem::take(&mut self.estimated_bytes),
        };
        self.next_sequence += 1;
        Some(batch)
    }

    /// Detaches the buffer onto the upload queue.
    fn detach_to_queue(&mut self, tier: &str) -> Option<Queued> {
        let batch = self.detach(tier)?;
        let queued = Queued {
            events: batch.len(),
            estimated_bytes: batch.estimated_bytes,
            start_worker: !self.worker_active,
        };
        self.pending.push_back(batch);
        self.worker_active = true;
        Some(queued)
    }

    /// Next batch for the worker. Clears `worker_active` once the queue is empty.
    fn next_upload(&mut self) -> Option<Batch> {
        let next = self.pending.pop_front();
        if next.is_none() {
            self.worker_active = false;
        }
        next
    }
}

/// Groups events by tier and hands full or stale buffers to the uploader.
pub struct BatchAccumulator<U: Uploader + 'static> {
    buffers: DashMap<String, Arc<Mutex<TierBuffer>>>,
    uploader: Arc<U>,
    max_batch_size_bytes: usize,
    inflight: Arc<InflightUploads>,
    metrics: Arc<IngestMetrics>,
    runtime: Handle,
}

impl<U: Uploader + 'static> BatchAccumulator<U> {
    /// Creates an accumulator. Upload workers are spawned on the current Tokio
    /// runtime, so this must be called from within one.
    pub fn new(uploader: Arc<U>, config: &BatchConfig, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            buffers: DashMap::new(),
            uploader,
            max_batch_size_bytes: config.max_batch_size_bytes,
            inflight: Arc::new(InflightUploads::new()),
            metrics,
            runtime: Handle::current(),
        }
    }

    pub fn uploader(&self) -> &Arc<U> {
        &self.uploader
    }

    pub fn max_batch_size_bytes(&self) -> usize {
        self.max_batch_size_bytes
    }

    /// Appends an event to the tier's buffer, detaching the buffer for upload
    /// when its estimated size reaches `max_batch_size_bytes`.
    ///
    /// Never waits on the upload itself.
    pub fn admit(&self, event: Event, tier: &str) -> Result<Admission, StorageError> {
        let start = Instant::now();
        let buffer = self.buffer_for(tier);

        let queued = {
            let mut guard = buffer.lock().map_lock_err().inspect_err(|e| {
                self.metrics.record_error();
                tracing::error!(tier = tier, error = %e, "Failed to lock tier buffer");
            })?;
            guard.estimated_bytes += event.estimated_size();
            guard.events.push(event);

            if guard.estimated_bytes >= self.max_batch_size_bytes {
                guard.detach_to_queue(tier)
            } else {
                None
            }
        };

        self.metrics
            .record_admit(start.elapsed().as_micros() as u64);

        match queued {
            Some(queued) => {
                tracing::debug!(
                    tier = tier,
                    events = queued.events,
                    estimated_bytes = queued.estimated_bytes,
                    threshold = self.max_batch_size_bytes,
                    "Size threshold reached, flushing tier"
                );
                if queued.start_worker {
                    self.spawn_worker(tier, buffer);
                }
                Ok(Admission::Flushed {
                    events: queued.events,
                    estimated_bytes: queued.estimated_bytes,
                })
            }
            None => Ok(Admission::Buffered),
        }
    }

    /// Detaches every non-empty buffer and queues it for upload.
    ///
    /// Tiers created while this runs may be left for the next call.
    pub fn flush_all(&self) -> FlushResult {
        let buffers: Vec<(String, Arc<Mutex<TierBuffer>>)> = self
            .buffers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut result = FlushResult {
            completed: true,
            ..FlushResult::default()
        };

        for (tier, buffer) in buffers {
            let queued = match buffer.lock().map_lock_err() {
                Ok(mut guard) => guard.detach_to_queue(&tier),
                Err(e) => {
                    self.metrics.record_error();
                    tracing::error!(tier = %tier, error = %e, "Skipping tier with poisoned buffer");
                    continue;
                }
            };

            if let Some(queued) = queued {
                result.batches_dispatched += 1;
                result.events_flushed += queued.events;
                if queued.start_worker {
                    self.spawn_worker(&tier, buffer);
                }
            }
        }

        if result.batches_dispatched > 0 {
            tracing::debug!(
                batches = result.batches_dispatched,
                events = result.events_flushed,
                "Flushed tier buffers"
            );
        }

        result
    }

    /// Flushes everything and waits until every queued batch has been uploaded
    /// or dropped, including size-triggered ones queued earlier.
    pub async fn drain(&self) -> FlushResult {
        let result = self.flush_all();
        self.wait_for_uploads().await;
        result
    }

    /// Resolves once every tier's upload queue is empty and idle.
    pub async fn wait_for_uploads(&self) {
        self.inflight.wait_idle().await;
    }

    /// Tiers with an upload worker running. Each worker has at most one
    /// upload in flight.
    pub fn uploads_in_flight(&self) -> usize {
        self.inflight.in_flight()
    }

    /// Events currently buffered across all tiers.
    pub fn pending_events(&self) -> usize {
        self.snapshot().iter().map(|s| s.events).sum()
    }

    /// Detached batches waiting behind an in-flight upload, across all tiers.
    pub fn queued_batches(&self) -> usize {
        self.buffers
            .iter()
            .filter_map(|entry| entry.value().lock().ok().map(|guard| guard.pending.len()))
            .sum()
    }

    /// Per-tier buffer sizes, sorted by tier. Poisoned buffers are omitted.
    pub fn snapshot(&self) -> Vec<TierStats> {
        let mut stats: Vec<TierStats> = self
            .buffers
            .iter()
            .filter_map(|entry| {
                let guard = entry.value().lock().ok()?;
                Some(TierStats {
                    tier: entry.key().clone(),
                    events: guard.events.len(),
                    estimated_bytes: guard.estimated_bytes,
                })
            })
            .collect();
        stats.sort_by(|a, b| a.tier.cmp(&b.tier));
        stats
    }

    fn buffer_for(&self, tier: &str) -> Arc<Mutex<TierBuffer>> {
        if let Some(existing) = self.buffers.get(tier) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.buffers.entry(tier.to_string()).or_default().value())
    }

    /// Starts the tier's upload worker. It uploads queued batches one at a
    /// time and exits when the queue is empty.
    fn spawn_worker(&self, tier: &str, buffer: Arc<Mutex<TierBuffer>>) {
        let uploader = Arc::clone(&self.uploader);
        let metrics = Arc::clone(&self.metrics);
        let guard = self.inflight.enter();
        let tier = tier.to_string();

        self.runtime.spawn(async move {
            let _guard = guard;
            loop {
                let next = match buffer.lock().map_lock_err() {
                    Ok(mut pending) => pending.next_upload(),
                    Err(e) => {
                        metrics.record_error();
                        tracing::error!(tier = %tier, error = %e, "Upload worker stopped on poisoned buffer");
                        return;
                    }
                };
                let Some(batch) = next else {
                    return;
                };
                process_batch(uploader.as_ref(), &metrics, batch).await;
            }
        });
    }
}

/// Uploads one batch. Failures are counted and logged, and the batch is dropped.
async fn process_batch<U: Uploader>(uploader: &U, metrics: &IngestMetrics, batch: Batch) {
    let start = Instant::now();
    match uploader.store(&batch).await {
        Ok(key) => {
            metrics.record_batch(batch.len() as u64, start.elapsed().as_millis() as u64);
            tracing::debug!(
                tier = %batch.tier,
                sequence = batch.sequence,
                events = batch.len(),
                key = %key,
                batches_total = metrics.batches(),
                "Processed batch"
            );
        }
        Err(e) => {
            metrics.record_error();
            tracing::error!(
                tier = %batch.tier,
                sequence = batch.sequence,
                events = batch.len(),
                error = %e,
                "Failed to store batch, dropping it"
            );
        }
    }
}
