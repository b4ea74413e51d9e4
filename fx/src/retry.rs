//! Retry policy with exponential backoff and jitter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Maps a backoff delay to the delay actually slept.
pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Full jitter: uniform in `[0, delay]`.
pub fn full_jitter(delay: Duration) -> Duration {
    let max_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Explicit retry policy wrapping a fallible async operation.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    jitter: JitterFn,
}

impl RetryPolicy {
    /// Create a policy with full jitter.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: Arc::new(full_jitter),
        }
    }

    /// Replace the jitter function.
    pub fn with_jitter(mut self, jitter: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Sleep exactly the backoff delay.
    pub fn without_jitter(self) -> Self {
        self.with_jitter(|delay| delay)
    }

    /// Un-jittered delay after the given failed attempt (1-based):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Jittered delay after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.jitter)(self.backoff(attempt)).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error or
    /// the attempts are used up. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(
        &self,
        name: &str,
        mut operation: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(600))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}
