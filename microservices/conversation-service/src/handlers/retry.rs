//! Version-conflict retry

use huddle_conversation::{ConversationError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::metrics::ServiceMetrics;

/// Exponential backoff for commands that lost an optimistic-concurrency race.
/// Any other error surfaces on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub async fn run<T, F, Fut>(
        &self,
        metrics: &ServiceMetrics,
        command: &'static str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(ConversationError::VersionConflict) if attempt < self.max_attempts => {
                    metrics.conflict_retries.inc();
                    let delay = self.delay_for(attempt);
                    warn!(
                        command,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Version conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let metrics = ServiceMetrics::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(&metrics, "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConversationError::VersionConflict)
            })
            .await;

        assert_eq!(result.unwrap_err(), ConversationError::VersionConflict);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.conflict_retries.get(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let metrics = ServiceMetrics::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(&metrics, "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConversationError::forbidden("no"))
            })
            .await;

        assert!(matches!(result, Err(ConversationError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
