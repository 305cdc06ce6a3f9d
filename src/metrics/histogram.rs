//! Lock-free fixed-bucket histogram with Prometheus exposition.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounds for admit latency, in microseconds (1μs to 10ms).
pub const ADMIT_LATENCY_BUCKETS_US: &[u64] = &[1, 5, 10, 25, 50, 100, 250, 500, 1_000, 10_000];

/// Bounds for upload duration including retries, in milliseconds (10ms to 10s).
pub const UPLOAD_DURATION_BUCKETS_MS: &[u64] = &[10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Histogram over a static set of upper bounds.
///
/// Each observation increments exactly one slot; cumulative counts are only
/// computed when rendering, so `observe` is a single pass plus three adds.
pub struct Histogram {
    bounds: &'static [u64],
    /// One slot per bound plus a trailing overflow slot
    slots: Box<[AtomicU64]>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &'static [u64]) -> Self {
        debug_assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        Self {
            bounds,
            slots: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn observe(&self, value: u64) {
        let slot = self.bounds.partition_point(|&b| b < value);
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Cumulative counts per bound (`le` semantics), excluding `+Inf`.
    pub fn cumulative(&self) -> Vec<u64> {
        let mut running = 0;
        self.bounds
            .iter()
            .zip(self.slots.iter())
            .map(|(_, slot)| {
                running += slot.load(Ordering::Relaxed);
                running
            })
            .collect()
    }

    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::with_capacity(768);
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (bound, count) in self.bounds.iter().zip(self.cumulative()) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let count = self.count();
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(output, "{}_sum {}", name, self.sum());
        let _ = writeln!(output, "{}_count {}", name, count);
        output
    }
}
