//! Observability metrics for the event receiver.
//!
//! Plain atomics, no external metrics crate. Rendered on `GET /metrics` in
//! Prometheus text format.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::IngestMetrics;
