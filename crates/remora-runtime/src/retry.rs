//! Exponential backoff retry for async operations.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Delay before the second attempt unless configured otherwise.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(10);

/// Total number of attempts unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Re-invokes a failing operation with a doubling delay between attempts.
///
/// With `max_attempts = 5` and `initial_interval = 10s` the delays between
/// attempts are 10s, 20s, 40s and 80s. The error of the last attempt is
/// returned unchanged.
pub struct ExponentialBackoffRetry<E> {
    initial_interval: Duration,
    max_attempts: u32,
    non_retriable: Option<RetryPredicate<E>>,
    label: Option<String>,
}

impl<E: fmt::Display> ExponentialBackoffRetry<E> {
    /// Create a retry policy. `max_attempts` is clamped to at least 1.
    pub fn new(initial_interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_interval,
            max_attempts: max_attempts.max(1),
            non_retriable: None,
            label: None,
        }
    }

    /// Errors for which `predicate` returns true are returned immediately.
    #[must_use]
    pub fn with_non_retriable<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.non_retriable = Some(Box::new(predicate));
        self
    }

    /// Name used in log messages.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-retriable error, or
    /// exhausts the attempts.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let label = self.label.as_deref().unwrap_or("operation");
        let mut interval = self.initial_interval;
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if self.non_retriable.as_ref().is_some_and(|skip| skip(&error)) {
                return Err(error);
            }

            if attempt >= self.max_attempts {
                error!(
                    label,
                    attempts = attempt,
                    error = %error,
                    "Giving up after exhausting retry attempts"
                );
                return Err(error);
            }

            warn!(
                label,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = interval.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(interval).await;
            interval = interval.saturating_mul(2);
            attempt += 1;
        }
    }
}

impl<E: fmt::Display> Default for ExponentialBackoffRetry<E> {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl<E> fmt::Debug for ExponentialBackoffRetry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoffRetry")
            .field("initial_interval", &self.initial_interval)
            .field("max_attempts", &self.max_attempts)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
