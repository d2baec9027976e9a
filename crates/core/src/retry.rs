//! The retry policy and delivery-metrics shape every C14 exporter adapter
//! shares: `{initial_interval, max_interval, max_elapsed_time, multiplier}`
//! plus the sent/failed/retried/dropped counters each adapter publishes to
//! the self-metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry attempt `attempt` (0-indexed: the delay before
    /// the *first* retry, after the initial send already failed once).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_interval)
    }
}

/// Delivery counters an exporter publishes to C15. Lock-free on the hot
/// path; snapshotting only loads the atomics.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliverySnapshot {
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped: u64,
}

impl DeliveryMetrics {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Runs `attempt_send` under the policy: on failure, sleeps the backoff and
/// retries until either it succeeds or `max_elapsed_time` has passed since
/// the first attempt, recording counters along the way.
pub async fn send_with_retry<F, Fut, E>(
    policy: &RetryPolicy,
    metrics: &DeliveryMetrics,
    mut attempt_send: F,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
{
    let started = std::time::Instant::now();
    let mut attempt = 0u32;
    loop {
        match attempt_send().await {
            Ok(()) => {
                metrics.record_sent();
                return Ok(());
            }
            Err(err) => {
                if started.elapsed() >= policy.max_elapsed_time {
                    metrics.record_failed();
                    return Err(err);
                }
                metrics.record_retried();
                tokio::time::sleep(policy.backoff_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_grows_geometrically_and_caps_at_max_interval() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(350),
            max_elapsed_time: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn send_with_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Duration::from_secs(5),
            multiplier: 2.0,
        };
        let metrics = DeliveryMetrics::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), &'static str> = send_with_retry(&policy, &metrics, || {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        let snap = metrics.snapshot();
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.retried, 2);
    }
}
