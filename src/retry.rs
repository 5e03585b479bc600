use std::future::Future;
use std::time::Duration;

/// Bounded retry with linearly increasing backoff, shared by every
/// external-tool call site so timeout/retry behavior stays uniform.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retrying after `attempt` (zero-based) has failed:
    /// base, 2*base, 3*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }

    /// Runs `op` up to `max_attempts` times, sleeping between attempts.
    /// Returns the last error once the budget is exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}
