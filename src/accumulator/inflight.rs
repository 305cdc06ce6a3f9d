use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts running upload workers.
#[derive(Default)]
pub struct InflightUploads {
    count: AtomicUsize,
    idle: Notify,
}

impl InflightUploads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one worker. It stays counted until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once no worker is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent last drop cannot be missed.
            notified.as_mut().enable();

            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard for one in-flight upload.
pub struct InflightGuard {
    tracker: Arc<InflightUploads>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let tracker = Arc::new(InflightUploads::new());
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_idle())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_every_guard() {
        let tracker = Arc::new(InflightUploads::new());
        let first = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.in_flight(), 2);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }
}
