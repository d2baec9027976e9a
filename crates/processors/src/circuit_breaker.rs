//! C8: per-database three-state circuit breaker. Evaluated on a fixed
//! window rather than per-request, per the resolved Open Question in §9.

use std::collections::HashMap;
use std::time::Duration;

use dbintel_core::{CircuitPhase, CircuitState};
use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{info, warn};

pub struct CircuitBreakerConfig {
    pub evaluation_window: Duration,
    pub error_rate_threshold: f64,
    pub min_qps_to_evaluate: f64,
    /// Opens the circuit on volume alone, independent of error rate, once
    /// qps in the evaluation window reaches this threshold.
    pub volume_threshold_qps: f64,
    pub open_duration: Duration,
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            evaluation_window: Duration::from_secs(10),
            error_rate_threshold: 0.5,
            min_qps_to_evaluate: 1.0,
            volume_threshold_qps: 1000.0,
            open_duration: Duration::from_secs(30),
            half_open_max_attempts: 3,
        }
    }
}

struct Window {
    requests: u64,
    errors: u64,
}

struct Breaker {
    state: CircuitState,
    window: Window,
}

/// Linear transitions only: Closed -> Open -> HalfOpen -> {Closed, Open}.
/// There is no direct Closed -> HalfOpen or HalfOpen -> Closed-without-trial
/// path.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Breaker>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    fn entry<'a>(breakers: &'a mut HashMap<String, Breaker>, database: &str) -> &'a mut Breaker {
        breakers.entry(database.to_string()).or_insert_with(|| Breaker {
            state: CircuitState::default(),
            window: Window { requests: 0, errors: 0 },
        })
    }

    /// `true` if a request against `database` is permitted right now.
    /// HalfOpen allows only up to `half_open_max_attempts` trial requests.
    pub fn allow(&self, database: &str) -> bool {
        let mut breakers = self.breakers.write();
        let breaker = Self::entry(&mut breakers, database);
        match breaker.state.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::Open => {
                let elapsed = chrono::Utc::now() - breaker.state.state_changed_at;
                if elapsed.to_std().unwrap_or_default() >= self.config.open_duration {
                    breaker.state.phase = CircuitPhase::HalfOpen;
                    breaker.state.state_changed_at = chrono::Utc::now();
                    breaker.state.half_open_attempt_count = 0;
                    info!(database, "circuit half-open, admitting trial requests");
                    true
                } else {
                    false
                }
            }
            CircuitPhase::HalfOpen => {
                if breaker.state.half_open_attempt_count < self.config.half_open_max_attempts {
                    breaker.state.half_open_attempt_count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_result(&self, database: &str, success: bool) {
        let mut breakers = self.breakers.write();
        let breaker = Self::entry(&mut breakers, database);
        match breaker.state.phase {
            CircuitPhase::Closed => {
                breaker.window.requests += 1;
                if !success {
                    breaker.window.errors += 1;
                }
            }
            CircuitPhase::HalfOpen => {
                if success {
                    if breaker.state.half_open_attempt_count >= self.config.half_open_max_attempts {
                        breaker.state.phase = CircuitPhase::Closed;
                        breaker.state.state_changed_at = chrono::Utc::now();
                        breaker.window = Window { requests: 0, errors: 0 };
                        info!(database, "circuit closed after successful trial period");
                    }
                } else {
                    breaker.state.phase = CircuitPhase::Open;
                    breaker.state.state_changed_at = chrono::Utc::now();
                    warn!(database, "circuit re-opened, trial request failed");
                }
            }
            CircuitPhase::Open => {}
        }
    }

    /// Evaluates one database's window against the configured triggers and
    /// resets it. Split out from `run_evaluator` so it can be driven
    /// directly in tests without waiting on the ticker.
    fn evaluate_one(config: &CircuitBreakerConfig, database: &str, breaker: &mut Breaker, window_secs: f64) {
        if breaker.state.phase != CircuitPhase::Closed {
            return;
        }
        let qps = breaker.window.requests as f64 / window_secs;

        if qps >= config.volume_threshold_qps {
            breaker.state.phase = CircuitPhase::Open;
            breaker.state.state_changed_at = chrono::Utc::now();
            warn!(database, qps, "circuit opened on volume alone");
            breaker.window = Window { requests: 0, errors: 0 };
            return;
        }

        if qps < config.min_qps_to_evaluate {
            breaker.window = Window { requests: 0, errors: 0 };
            return;
        }
        let error_rate = breaker.window.errors as f64 / breaker.window.requests.max(1) as f64;
        if error_rate >= config.error_rate_threshold {
            breaker.state.phase = CircuitPhase::Open;
            breaker.state.state_changed_at = chrono::Utc::now();
            warn!(database, error_rate, qps, "circuit opened");
        }
        breaker.window = Window { requests: 0, errors: 0 };
    }

    /// Background task: every `evaluation_window`, closed breakers flip to
    /// Open if either the error rate exceeds the threshold (at sufficient
    /// qps to be meaningful) or qps alone exceeds `volume_threshold_qps`,
    /// regardless of error rate.
    pub async fn run_evaluator(&self) {
        let mut ticker = interval(self.config.evaluation_window);
        loop {
            ticker.tick().await;
            let window_secs = self.config.evaluation_window.as_secs_f64().max(1.0);
            let mut breakers = self.breakers.write();
            for (database, breaker) in breakers.iter_mut() {
                Self::evaluate_one(&self.config, database, breaker, window_secs);
            }
        }
    }

    pub fn state_of(&self, database: &str) -> CircuitState {
        self.breakers
            .read()
            .get(database)
            .map(|b| b.state.clone())
            .unwrap_or_default()
    }

    pub fn snapshot_all(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.state.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_database_starts_closed_and_allows_requests() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert!(cb.allow("db1"));
        assert_eq!(cb.state_of("db1").phase, CircuitPhase::Closed);
    }

    #[test]
    fn open_circuit_rejects_until_open_duration_elapses() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            open_duration: Duration::from_secs(3600),
            ..Default::default()
        });
        {
            let mut breakers = cb.breakers.write();
            let breaker = CircuitBreaker::entry(&mut breakers, "db1");
            breaker.state.phase = CircuitPhase::Open;
            breaker.state.state_changed_at = chrono::Utc::now();
        }
        assert!(!cb.allow("db1"));
    }

    #[test]
    fn half_open_closes_after_enough_successful_trials() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            half_open_max_attempts: 2,
            ..Default::default()
        });
        {
            let mut breakers = cb.breakers.write();
            let breaker = CircuitBreaker::entry(&mut breakers, "db1");
            breaker.state.phase = CircuitPhase::HalfOpen;
        }
        assert!(cb.allow("db1"));
        cb.record_result("db1", true);
        assert!(cb.allow("db1"));
        cb.record_result("db1", true);
        assert_eq!(cb.state_of("db1").phase, CircuitPhase::Closed);
    }

    #[test]
    fn half_open_reopens_immediately_on_trial_failure() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        {
            let mut breakers = cb.breakers.write();
            let breaker = CircuitBreaker::entry(&mut breakers, "db1");
            breaker.state.phase = CircuitPhase::HalfOpen;
        }
        assert!(cb.allow("db1"));
        cb.record_result("db1", false);
        assert_eq!(cb.state_of("db1").phase, CircuitPhase::Open);
    }

    #[test]
    fn volume_alone_opens_the_circuit_even_with_zero_errors() {
        let config = CircuitBreakerConfig {
            volume_threshold_qps: 50.0,
            error_rate_threshold: 0.9,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);
        {
            let mut breakers = cb.breakers.write();
            let breaker = CircuitBreaker::entry(&mut breakers, "db1");
            breaker.window = Window {
                requests: 600,
                errors: 0,
            };
        }
        {
            let mut breakers = cb.breakers.write();
            let breaker = breakers.get_mut("db1").unwrap();
            CircuitBreaker::evaluate_one(&cb.config, "db1", breaker, 10.0);
        }
        assert_eq!(cb.state_of("db1").phase, CircuitPhase::Open);
    }

    #[test]
    fn below_volume_threshold_error_free_traffic_stays_closed() {
        let config = CircuitBreakerConfig {
            volume_threshold_qps: 1000.0,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);
        {
            let mut breakers = cb.breakers.write();
            let breaker = CircuitBreaker::entry(&mut breakers, "db1");
            breaker.window = Window {
                requests: 100,
                errors: 0,
            };
        }
        {
            let mut breakers = cb.breakers.write();
            let breaker = breakers.get_mut("db1").unwrap();
            CircuitBreaker::evaluate_one(&cb.config, "db1", breaker, 10.0);
        }
        assert_eq!(cb.state_of("db1").phase, CircuitPhase::Closed);
    }
}
