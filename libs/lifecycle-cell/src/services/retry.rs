// libs/lifecycle-cell/src/services/retry.rs
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_models::LifecycleError;

/// Re-runs a whole operation while the store reports a transient failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.store_max_attempts, config.store_retry_backoff_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Linear backoff before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LifecycleError>>,
    {
        let mut attempt = 1;
        loop {
            debug!("{} attempt {}/{}", operation, attempt, self.max_attempts);

            match attempt_fn().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} hit a transient store failure, retrying attempt {}/{}: {}",
                        operation, attempt, self.max_attempts, err
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
