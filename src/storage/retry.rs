//! Upload retry policy and S3 error classification.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Runs an object store operation, retrying transient failures with backoff.
///
/// The operation must evaluate to `Result<T, StorageError>`. A transient error
/// still present after the last attempt comes back as `StorageError::Terminal`.
///
/// # Usage
/// ```ignore
/// upload_retry!(
///     operation = { store.put_object(&key, body.clone(), "application/json").await },
///     retry_config = self.retry_config,
///     context = format!("PUT {}", key),
///     on_retry = || metrics.record_retry(),
/// )?;
/// ```
#[macro_export]
macro_rules! upload_retry {
    (
        operation = $op:expr,
        retry_config = $config:expr,
        context = $ctx:expr,
        on_retry = $hook:expr $(,)?
    ) => {{
        use backon::Retryable;

        let context = $ctx;
        let on_retry = $hook;
        (|| async { $op })
            .retry($config.backoff())
            .when(|e: &$crate::contracts::StorageError| e.is_transient())
            .notify(|err: &$crate::contracts::StorageError, dur: std::time::Duration| {
                on_retry();
                tracing::warn!(
                    context = %context,
                    error = %err,
                    retry_in = ?dur,
                    "Object store operation failed, retrying"
                );
            })
            .await
            .map_err($crate::contracts::StorageError::into_terminal)
    }};
}

/// Exponential backoff for uploads.
///
/// Defaults: 3 attempts in total, waiting 1s then 2s between them.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied to each subsequent delay.
    pub multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No jitter: delays are exactly `initial_delay * multiplier^n`.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Classifies S3 error codes and messages as retryable or not.
///
/// Retryable errors include:
/// - Network issues (timeout, connection reset, connection refused, broken pipe)
/// - Service unavailability (500, 503, ServiceUnavailable, InternalError)
/// - Throttling (429, SlowDown, ThrottlingException)
pub fn is_retryable_s3_error(err: &str) -> bool {
    let retryable_patterns = [
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "broken pipe",
        "serviceunavailable",
        "service unavailable",
        "internalerror",
        "500",
        "502",
        "503",
        "504",
        "slowdown",
        "429",
        "throttling",
        "requesttimeout",
    ];
    let err_lower = err.to_lowercase();
    retryable_patterns.iter().any(|p| err_lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_default_delays_are_one_then_two_seconds() {
        let delays: Vec<Duration> = RetryConfig::default().backoff().build().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_total_injected_delay_is_bounded() {
        let total: Duration = RetryConfig::default().backoff().build().sum();
        assert!(total <= Duration::from_secs(3));
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        let config = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff().build().count(), 0);
    }

    #[test]
    fn test_is_retryable_network() {
        assert!(is_retryable_s3_error("Connection timed out"));
        assert!(is_retryable_s3_error("connection reset by peer"));
        assert!(is_retryable_s3_error("Connection refused"));
        assert!(is_retryable_s3_error("Broken pipe"));
    }

    #[test]
    fn test_is_retryable_service_and_throttling() {
        assert!(is_retryable_s3_error("ServiceUnavailable"));
        assert!(is_retryable_s3_error("503 Service Unavailable"));
        assert!(is_retryable_s3_error("InternalError"));
        assert!(is_retryable_s3_error("SlowDown"));
        assert!(is_retryable_s3_error("ThrottlingException"));
        assert!(is_retryable_s3_error("429 Too Many Requests"));
    }

    #[test]
    fn test_not_retryable() {
        assert!(!is_retryable_s3_error("NoSuchBucket"));
        assert!(!is_retryable_s3_error("AccessDenied"));
        assert!(!is_retryable_s3_error("InvalidAccessKeyId"));
        assert!(!is_retryable_s3_error("SignatureDoesNotMatch"));
        assert!(!is_retryable_s3_error("MalformedXML"));
    }
}
