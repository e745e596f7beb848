use crate::config::TasksConfig;
use std::time::Duration;

/// Exponential backoff policy for retryable stage failures.
///
/// `delay_for(n)` is the wait before the n-th retry (1-based):
/// `initial_delay * backoff_factor^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_task_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Policy that never retries. Imaging and processing failures are
    /// terminal; only the upload stage carries a real policy.
    pub fn none() -> Self {
        Self {
            max_task_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    pub fn from_config(config: &TasksConfig) -> Self {
        Self {
            max_task_retries: config.max_task_retries,
            initial_delay: Duration::from_secs(config.initial_retry_delay_secs),
            max_delay: Duration::from_secs(config.max_retry_delay_secs),
            backoff_factor: config.retry_backoff_factor,
        }
    }

    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_task_retries
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_factor.powi(retry as i32 - 1);
        let secs = self.initial_delay.as_secs_f64() * factor;
        let delay = Duration::from_secs_f64(secs);
        delay.min(self.max_delay)
    }
}
