use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded exponential backoff for backend reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Default::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt as i32);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor);
        std::cmp::min(self.max_delay, delay)
    }

    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if attempt + 1 >= self.max_attempts => {
                    warn!(attempts = self.max_attempts, error = %err, "Operation failed, giving up");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
