//! Counters for the ingest path and the upload pipeline.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::histogram::{Histogram, ADMIT_LATENCY_BUCKETS_US, UPLOAD_DURATION_BUCKETS_MS};
use crate::contracts::TierStats;

/// All service metrics. Shared as `Arc<IngestMetrics>`.
pub struct IngestMetrics {
    /// Ingest requests received
    pub requests_total: AtomicU64,
    /// Requests whose tier passed the allow-list
    pub requests_filtered_total: AtomicU64,
    /// Requests rejected for validation or tier
    pub requests_rejected_total: AtomicU64,
    /// Events appended to a tier buffer
    pub events_processed_total: AtomicU64,
    /// Batches written to the object store
    pub batches_total: AtomicU64,
    /// Events contained in uploaded batches
    pub batch_events_total: AtomicU64,
    /// Terminal upload failures and failed admits
    pub errors_total: AtomicU64,
    /// Transient failures that were retried
    pub upload_retries_total: AtomicU64,
    pub admit_latency_us: Histogram,
    pub upload_duration_ms: Histogram,
    start_time: Instant,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_filtered_total: AtomicU64::new(0),
            requests_rejected_total: AtomicU64::new(0),
            events_processed_total: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            batch_events_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            upload_retries_total: AtomicU64::new(0),
            admit_latency_us: Histogram::new(ADMIT_LATENCY_BUCKETS_US),
            upload_duration_ms: Histogram::new(UPLOAD_DURATION_BUCKETS_MS),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_filtered(&self) {
        self.requests_filtered_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.requests_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_admit(&self, latency_us: u64) {
        self.events_processed_total.fetch_add(1, Ordering::Relaxed);
        self.admit_latency_us.observe(latency_us);
    }

    #[inline]
    pub fn record_batch(&self, events: u64, duration_ms: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batch_events_total.fetch_add(events, Ordering::Relaxed);
        self.upload_duration_ms.observe(duration_ms);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.upload_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches(&self) -> u64 {
        self.batches_total.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed_total.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition, including live buffer gauges per tier.
    pub fn format_prometheus(&self, buffers: &[TierStats]) -> String {
        let mut output = String::with_capacity(4096);

        let _ = writeln!(output, "# HELP event_uptime_seconds Process uptime in seconds");
        let _ = writeln!(output, "# TYPE event_uptime_seconds gauge");
        let _ = writeln!(
            output,
            "event_uptime_seconds {:.3}\n",
            self.start_time.elapsed().as_secs_f64()
        );

        let counters: [(&str, &str, &AtomicU64); 8] = [
            ("event_requests_total", "Total number of event requests received", &self.requests_total),
            ("event_requests_filtered_total", "Event requests that passed the tier allow-list", &self.requests_filtered_total),
            ("event_requests_rejected_total", "Event requests rejected before admission", &self.requests_rejected_total),
            ("event_processed_total", "Total number of events processed", &self.events_processed_total),
            ("event_batches_total", "Total number of batches uploaded", &self.batches_total),
            ("event_batch_events_total", "Events contained in uploaded batches", &self.batch_events_total),
            ("event_errors_total", "Total number of processing errors", &self.errors_total),
            ("event_upload_retries_total", "Transient upload failures that were retried", &self.upload_retries_total),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}\n", name, value.load(Ordering::Relaxed));
        }

        output.push_str(
            &self
                .admit_latency_us
                .format_prometheus("event_processing_time_us", "Time taken to admit an event"),
        );
        output.push('\n');
        output.push_str(&self.upload_duration_ms.format_prometheus(
            "event_upload_duration_ms",
            "Time taken to upload a batch including retries",
        ));

        if !buffers.is_empty() {
            output.push('\n');
            let _ = writeln!(output, "# HELP event_buffered_events Events waiting in a tier buffer");
            let _ = writeln!(output, "# TYPE event_buffered_events gauge");
            for stats in buffers {
                let _ = writeln!(output, "event_buffered_events{{tier=\"{}\"}} {}", stats.tier, stats.events);
            }
            let _ = writeln!(output, "# HELP event_buffered_bytes Estimated bytes waiting in a tier buffer");
            let _ = writeln!(output, "# TYPE event_buffered_bytes gauge");
            for stats in buffers {
                let _ = writeln!(
                    output,
                    "event_buffered_bytes{{tier=\"{}\"}} {}",
                    stats.tier, stats.estimated_bytes
                );
            }
        }

        output
    }
}
