//! C6: per-database token bucket with adaptive rps adjustment and scheduled
//! windows. Gates receivers and outbound pool use (§5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbintel_core::{RateLimiterBucket, ScheduleWindow};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::info;

const ADJUSTMENT_REQUEST_COUNT: u64 = 100;
const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);
const REJECT_RATE_HIGH: f64 = 0.10;
const REJECT_RATE_LOW: f64 = 0.01;
const DOWNSHIFT_FACTOR: f64 = 0.9;
const UPSHIFT_FACTOR: f64 = 1.05;

struct Bucket {
    /// Tokens available right now, scaled by 1000 to keep the hot path on
    /// integer atomics while still allowing fractional rps.
    tokens_milli: AtomicU64,
    burst_milli: u64,
    rps: Mutex<f64>,
    burst: Mutex<u32>,
    min_rps: f64,
    max_rps: f64,
    success_count: AtomicU64,
    reject_count: AtomicU64,
    last_refill: Mutex<Instant>,
    last_adjusted: Mutex<Instant>,
    window_started: Mutex<Instant>,
    schedule: Vec<ScheduleWindow>,
}

impl Bucket {
    fn new(rps: f64, burst: u32, min_rps: f64, max_rps: f64, schedule: Vec<ScheduleWindow>) -> Self {
        Self {
            tokens_milli: AtomicU64::new((burst as u64) * 1000),
            burst_milli: (burst as u64) * 1000,
            rps: Mutex::new(rps),
            burst: Mutex::new(burst),
            min_rps,
            max_rps,
            success_count: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
            last_refill: Mutex::new(Instant::now()),
            last_adjusted: Mutex::new(Instant::now()),
            window_started: Mutex::new(Instant::now()),
            schedule,
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed();
        *last = Instant::now();
        let rps = *self.rps.lock();
        let add_milli = (elapsed.as_secs_f64() * rps * 1000.0) as u64;
        if add_milli == 0 {
            return;
        }
        let burst_milli = self.burst_milli;
        self.tokens_milli
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some((t + add_milli).min(burst_milli))
            })
            .ok();
    }

    /// `rps = 0` means no tokens are ever issued; every request is rejected
    /// (boundary behavior in §8).
    fn try_allow(&self) -> bool {
        let rps = *self.rps.lock();
        if rps <= 0.0 {
            self.reject_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.refill();
        let allowed = self
            .tokens_milli
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                if t >= 1000 {
                    Some(t - 1000)
                } else {
                    None
                }
            })
            .is_ok();
        if allowed {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reject_count.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// After every 100 requests or 30 seconds, recompute the reject rate
    /// and adjust rps by ±10%/5%, clamped to `[min_rps, max_rps]`.
    fn maybe_adjust(&self) {
        let total = self.success_count.load(Ordering::Relaxed) + self.reject_count.load(Ordering::Relaxed);
        let window_elapsed = self.window_started.lock().elapsed();
        if total < ADJUSTMENT_REQUEST_COUNT && window_elapsed < ADJUSTMENT_INTERVAL {
            return;
        }
        if total == 0 {
            return;
        }
        let success = self.success_count.swap(0, Ordering::Relaxed);
        let rejects = self.reject_count.swap(0, Ordering::Relaxed);
        *self.window_started.lock() = Instant::now();

        let reject_rate = rejects as f64 / (success + rejects).max(1) as f64;
        let mut rps = self.rps.lock();
        if reject_rate > REJECT_RATE_HIGH {
            *rps = (*rps * DOWNSHIFT_FACTOR).clamp(self.min_rps, self.max_rps);
        } else if reject_rate < REJECT_RATE_LOW {
            *rps = (*rps * UPSHIFT_FACTOR).clamp(self.min_rps, self.max_rps);
        }
        *self.last_adjusted.lock() = Instant::now();
    }

    fn apply_schedule(&self, hour: u8) {
        for window in &self.schedule {
            let matches = if window.start_hour <= window.end_hour {
                hour >= window.start_hour && hour < window.end_hour
            } else {
                hour >= window.start_hour || hour < window.end_hour
            };
            if matches {
                *self.rps.lock() = window.rps;
                *self.burst.lock() = window.burst;
                return;
            }
        }
    }

    fn snapshot(&self, database: &str) -> RateLimiterBucket {
        RateLimiterBucket {
            database: database.to_string(),
            rps: *self.rps.lock(),
            burst: *self.burst.lock(),
            success_count: self.success_count.load(Ordering::Relaxed),
            reject_count: self.reject_count.load(Ordering::Relaxed),
            last_adjusted: chrono::Utc::now() - chrono::Duration::from_std(self.last_adjusted.lock().elapsed()).unwrap_or_default(),
            schedule: self.schedule.clone(),
        }
    }
}

pub struct RateLimiterConfig {
    pub default_rps: f64,
    pub default_burst: u32,
    pub min_rps: f64,
    pub max_rps: f64,
    /// Above all per-database buckets, a single global bucket gates overall
    /// throughput.
    pub global_rps: Option<f64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_rps: 100.0,
            default_burst: 100,
            min_rps: 10.0,
            max_rps: 1000.0,
            global_rps: None,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    global: Option<Arc<Semaphore>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let global = config.global_rps.map(|rps| Arc::new(Semaphore::new(rps as usize)));
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            global,
        }
    }

    fn bucket_for(&self, database: &str) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(database.to_string())
            .or_insert_with(|| {
                Arc::new(Bucket::new(
                    self.config.default_rps,
                    self.config.default_burst,
                    self.config.min_rps,
                    self.config.max_rps,
                    vec![],
                ))
            })
            .clone()
    }

    /// `allow(db) -> bool`. Rejections are not errors; callers decide
    /// policy.
    pub fn allow(&self, database: &str) -> bool {
        if let Some(global) = &self.global {
            if global.try_acquire().is_err() {
                return false;
            }
        }
        let bucket = self.bucket_for(database);
        let allowed = bucket.try_allow();
        bucket.maybe_adjust();
        allowed
    }

    pub fn update_limit(&self, database: &str, rps: f64, burst: u32) {
        let bucket = self.bucket_for(database);
        *bucket.rps.lock() = rps.clamp(self.config.min_rps, self.config.max_rps);
        *bucket.burst.lock() = burst;
    }

    pub fn set_schedule(&self, database: &str, schedule: Vec<ScheduleWindow>) {
        let mut buckets = self.buckets.lock();
        let entry = buckets.entry(database.to_string()).or_insert_with(|| {
            Arc::new(Bucket::new(
                self.config.default_rps,
                self.config.default_burst,
                self.config.min_rps,
                self.config.max_rps,
                vec![],
            ))
        });
        *entry = Arc::new(Bucket::new(
            *entry.rps.lock(),
            *entry.burst.lock(),
            self.config.min_rps,
            self.config.max_rps,
            schedule,
        ));
    }

    pub fn snapshot(&self, database: &str) -> Option<RateLimiterBucket> {
        self.buckets.lock().get(database).map(|b| b.snapshot(database))
    }

    /// Background task: on 1-minute ticks, consults each bucket's schedule
    /// and applies the first matching interval, replacing any adaptive
    /// setting (§4.6, resolved Open Question: first match wins).
    pub async fn run_schedule_checker(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let hour = chrono::Utc::now().hour() as u8;
            let buckets: Vec<Arc<Bucket>> = self.buckets.lock().values().cloned().collect();
            for bucket in buckets {
                if !bucket.schedule.is_empty() {
                    bucket.apply_schedule(hour);
                    info!(hour, "applied scheduled rate limit window");
                }
            }
        }
    }
}

use chrono::Timelike;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rps_rejects_every_request() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            default_rps: 0.0,
            default_burst: 10,
            min_rps: 0.0,
            max_rps: 1000.0,
            global_rps: None,
        });
        for _ in 0..5 {
            assert!(!limiter.allow("db1"));
        }
    }

    #[test]
    fn adaptive_downshift_triggers_on_high_reject_rate() {
        let bucket = Bucket::new(100.0, 100, 10.0, 1000.0, vec![]);
        bucket.success_count.store(800, Ordering::Relaxed);
        bucket.reject_count.store(200, Ordering::Relaxed);
        *bucket.window_started.lock() = Instant::now() - Duration::from_secs(31);
        bucket.maybe_adjust();
        let rps = *bucket.rps.lock();
        assert!((rps - 90.0).abs() < 1e-6, "expected rps ~= 90, got {rps}");
    }

    #[test]
    fn burst_caps_immediate_token_availability() {
        let bucket = Bucket::new(1.0, 2, 0.0, 10.0, vec![]);
        assert!(bucket.try_allow());
        assert!(bucket.try_allow());
        assert!(!bucket.try_allow());
    }
}
