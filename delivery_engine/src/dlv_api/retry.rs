use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use log::*;

use crate::DeliveryError;

pub type RetryPredicate = Arc<dyn Fn(&DeliveryError) -> bool + Send + Sync>;

/// Bounded exponential backoff around store calls.
///
/// Only wrap calls that are safe to repeat: reads, and writes guarded by a uniqueness constraint or a
/// compare-and-set.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    retryable: RetryPredicate,
}

impl Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(50), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retryable: Arc::new(DeliveryError::is_retryable),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retries() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where F: Fn(&DeliveryError) -> bool + Send + Sync + 'static {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &DeliveryError) -> bool {
        (self.retryable)(err)
    }

    /// The pause after the given failed attempt (1-based): `base_delay × 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Calls `op` until it succeeds, fails with an error the predicate rejects, or the attempts run out. The last
    /// error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && self.is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!("🔄️ {label} failed on attempt {attempt}/{}: {e}. Retrying in {delay:?}", self.max_attempts);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    if attempt > 1 {
                        debug!("🔄️ {label} gave up after {attempt} attempts");
                    }
                    return Err(e);
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn busy() -> DeliveryError {
        DeliveryError::Database { message: "database is locked".into(), retryable: true }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let result = policy
            .run("flaky read", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(busy())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));
        let result: Result<(), _> = policy
            .run("always busy", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            })
            .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run("transition", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::InvalidTransition("stale".into()))
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "INVALID_TRANSITION");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_predicates() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO).with_predicate(|_| false);
        let _ = policy
            .run("never retried", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(busy())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
