use std::fmt;
use std::future::Future;

use crate::contracts::error::SchedulerError;

/// Time-triggered flushing of the batch accumulator.
///
/// # Behavior
/// - Fires every `max_batch_delay` at a fixed rate from start
/// - Each firing flushes every non-empty tier buffer
/// - `stop` refuses new firings, then drains all buffers and in-flight uploads
pub trait Flusher: Send + Sync {
    /// Starts the background timer. Only valid from `Initial`.
    fn start(&self) -> impl Future<Output = Result<(), SchedulerError>> + Send;

    /// Stops the timer and drains. Waits at most the shutdown timeout.
    fn stop(&self) -> impl Future<Output = Result<FlushResult, SchedulerError>> + Send;

    /// Forces an immediate flush of all non-empty buffers.
    fn flush_now(&self) -> impl Future<Output = Result<FlushResult, SchedulerError>> + Send;

    /// Current lifecycle state.
    fn state(&self) -> SchedulerState;
}

/// Lifecycle of the flush scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Initial,
    Running,
    Stopping,
    Terminated,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a flush operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of batches handed to the uploader
    pub batches_dispatched: usize,
    /// Number of events in those batches
    pub events_flushed: usize,
    /// False when a drain gave up before every upload finished
    pub completed: bool,
}
