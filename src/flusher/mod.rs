use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::accumulator::BatchAccumulator;
use crate::config::BatchConfig;
use crate::contracts::{
    FlushResult, Flusher, LockResultExt, SchedulerError, SchedulerState, Uploader,
};

/// Configuration for the flush scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period between time-triggered flushes
    pub interval: Duration,
    /// Upper bound on the final drain
    pub shutdown_timeout: Duration,
}

impl From<&BatchConfig> for SchedulerConfig {
    fn from(batch: &BatchConfig) -> Self {
        Self {
            interval: batch.max_batch_delay,
            shutdown_timeout: batch.shutdown_timeout,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

/// Background task that flushes every tier buffer at a fixed rate.
pub struct FlushScheduler<U: Uploader + 'static> {
    accumulator: Arc<BatchAccumulator<U>>,
    config: SchedulerConfig,
    state: RwLock<SchedulerState>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Wakes the task so it sees the shutdown flag
    wake: Arc<Notify>,
    task_handle: RwLock<Option<JoinHandle<()>>>,
}

impl<U: Uploader + 'static> FlushScheduler<U> {
    pub fn new(accumulator: Arc<BatchAccumulator<U>>, config: SchedulerConfig) -> Self {
        Self {
            accumulator,
            config,
            state: RwLock::new(SchedulerState::Initial),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            task_handle: RwLock::new(None),
        }
    }

    pub fn accumulator(&self) -> &Arc<BatchAccumulator<U>> {
        &self.accumulator
    }

    /// Moves to `to` if the current state is one of `allowed`, returning the old state.
    fn transition(
        &self,
        allowed: &[SchedulerState],
        to: SchedulerState,
    ) -> Result<SchedulerState, SchedulerError> {
        let mut state = self.state.write().map_lock_err()?;
        let from = *state;
        if !allowed.contains(&from) {
            return Err(SchedulerError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        *state = to;
        Ok(from)
    }
}

impl<U: Uploader + 'static> Flusher for FlushScheduler<U> {
    async fn start(&self) -> Result<(), SchedulerError> {
        self.transition(&[SchedulerState::Initial], SchedulerState::Running)?;

        let accumulator = Arc::clone(&self.accumulator);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let period = self.config.interval;

        let handle = tokio::spawn(async move {
            tracing::info!(interval_ms = period.as_millis() as u64, "Flush scheduler started");

            // Fixed rate from start; a late tick is skipped rather than replayed.
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    _ = wake.notified() => {},
                }

                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let result = accumulator.flush_all();
                if result.batches_dispatched > 0 {
                    tracing::debug!(
                        batches = result.batches_dispatched,
                        events = result.events_flushed,
                        "Time-triggered flush"
                    );
                }
            }

            tracing::info!("Flush scheduler task stopped");
        });

        let mut task_handle = self.task_handle.write().map_lock_err()?;
        *task_handle = Some(handle);

        Ok(())
    }

    async fn stop(&self) -> Result<FlushResult, SchedulerError> {
        self.transition(
            &[SchedulerState::Initial, SchedulerState::Running],
            SchedulerState::Stopping,
        )?;

        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        let handle = {
            let mut task_handle = self.task_handle.write().map_lock_err()?;
            task_handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Flush scheduler task failed, draining anyway");
            }
        }

        let mut result = self.accumulator.flush_all();
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.accumulator.wait_for_uploads(),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(
                    batches = result.batches_dispatched,
                    events = result.events_flushed,
                    "Drained tier buffers"
                );
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    batches = result.batches_dispatched,
                    events = result.events_flushed,
                    uploads_in_flight = self.accumulator.uploads_in_flight(),
                    "Drain timed out, abandoning remaining uploads"
                );
                result.completed = false;
            }
        }

        *self.state.write().map_lock_err()? = SchedulerState::Terminated;
        tracing::info!("Flush scheduler terminated");

        Ok(result)
    }

    async fn flush_now(&self) -> Result<FlushResult, SchedulerError> {
        Ok(self.accumulator.flush_all())
    }

    fn state(&self) -> SchedulerState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::contracts::{Batch, Event, StorageError};
    use crate::metrics::IngestMetrics;

    #[derive(Default)]
    struct RecordingUploader {
        batches: Mutex<Vec<Batch>>,
        delay: Option<Duration>,
    }

    impl Uploader for RecordingUploader {
        async fn store(&self, batch: &Batch) -> Result<String, StorageError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.batches.lock().unwrap().push(batch.clone());
            Ok(format!("{}/key.json", batch.tier))
        }
    }

    fn scheduler(
        uploader: RecordingUploader,
        interval: Duration,
        shutdown_timeout: Duration,
    ) -> FlushScheduler<RecordingUploader> {
        let batch = BatchConfig {
            max_batch_size_bytes: 10_000,
            max_batch_delay: interval,
            shutdown_timeout,
        };
        let accumulator = Arc::new(BatchAccumulator::new(
            Arc::new(uploader),
            &batch,
            Arc::new(IngestMetrics::new()),
        ));
        FlushScheduler::new(accumulator, SchedulerConfig::from(&batch))
    }

    fn uploaded(s: &FlushScheduler<RecordingUploader>) -> Vec<Batch> {
        s.accumulator().uploader().batches.lock().unwrap().clone()
    }

    #[test]
    fn test_scheduler_config_from_batch_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let s = scheduler(
            RecordingUploader::default(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        assert_eq!(s.state(), SchedulerState::Initial);

        s.start().await.unwrap();
        assert_eq!(s.state(), SchedulerState::Running);
        assert!(matches!(
            s.start().await,
            Err(SchedulerError::InvalidTransition { from: "running", to: "running" })
        ));

        let result = s.stop().await.unwrap();
        assert!(result.completed);
        assert_eq!(s.state(), SchedulerState::Terminated);

        assert!(matches!(
            s.stop().await,
            Err(SchedulerError::InvalidTransition { from: "terminated", .. })
        ));
    }

    #[tokio::test]
    async fn test_timer_flushes_buffered_events() {
        let s = scheduler(
            RecordingUploader::default(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        s.start().await.unwrap();
        s.accumulator()
            .admit(Event::new(Utc::now(), "hi"), "premium")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        s.accumulator().wait_for_uploads().await;

        let batches = uploaded(&s);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tier, "premium");
        assert_eq!(batches[0].events.len(), 1);

        s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_pending_events() {
        let s = scheduler(
            RecordingUploader {
                delay: Some(Duration::from_millis(30)),
                ..RecordingUploader::default()
            },
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        s.start().await.unwrap();
        s.accumulator()
            .admit(Event::new(Utc::now(), "a"), "premium")
            .unwrap();
        s.accumulator()
            .admit(Event::new(Utc::now(), "b"), "standard")
            .unwrap();

        let result = s.stop().await.unwrap();

        assert_eq!(result.batches_dispatched, 2);
        assert_eq!(result.events_flushed, 2);
        assert!(result.completed);
        assert_eq!(uploaded(&s).len(), 2);
        assert_eq!(s.accumulator().pending_events(), 0);
    }

    #[tokio::test]
    async fn test_stop_gives_up_after_timeout() {
        let s = scheduler(
            RecordingUploader {
                delay: Some(Duration::from_secs(5)),
                ..RecordingUploader::default()
            },
            Duration::from_secs(60),
            Duration::from_millis(50),
        );
        s.start().await.unwrap();
        s.accumulator()
            .admit(Event::new(Utc::now(), "slow"), "premium")
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), s.stop())
            .await
            .expect("stop should respect the shutdown timeout")
            .unwrap();

        assert!(!result.completed);
        assert_eq!(result.batches_dispatched, 1);
        assert_eq!(result.events_flushed, 1);
        assert_eq!(s.state(), SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_drains_after_task_failure() {
        let s = scheduler(
            RecordingUploader::default(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        s.start().await.unwrap();
        s.task_handle.read().unwrap().as_ref().unwrap().abort();
        s.accumulator()
            .admit(Event::new(Utc::now(), "left over"), "premium")
            .unwrap();

        let result = s.stop().await.unwrap();

        assert!(result.completed);
        assert_eq!(result.events_flushed, 1);
        assert_eq!(s.state(), SchedulerState::Terminated);
        let batches = uploaded(&s);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].events[0].body, "left over");
    }

    #[tokio::test]
    async fn test_flush_now_dispatches_immediately() {
        let s = scheduler(
            RecordingUploader::default(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        assert_eq!(s.flush_now().await.unwrap().batches_dispatched, 0);

        s.accumulator()
            .admit(Event::new(Utc::now(), "now"), "premium")
            .unwrap();
        let result = s.flush_now().await.unwrap();
        assert_eq!(result.batches_dispatched, 1);

        s.accumulator().wait_for_uploads().await;
        assert_eq!(uploaded(&s).len(), 1);
    }
}
