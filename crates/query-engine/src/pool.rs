//! C3: per-(driver, host, port, database) connection pool registry with
//! health checking and a global connection cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbintel_core::{CollectorError, PoolKey, PoolStats};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct PoolLimits {
    pub max_open: u32,
    pub max_idle: u32,
    pub conn_max_lifetime: Duration,
    pub conn_max_idle_time: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 5,
            conn_max_lifetime: Duration::from_secs(30 * 60),
            conn_max_idle_time: Duration::from_secs(10 * 60),
        }
    }
}

impl PoolLimits {
    fn validate(&self, global_max: u32) -> Result<(), CollectorError> {
        if self.max_open == 0 || self.max_open > global_max {
            return Err(CollectorError::ConfigError(format!(
                "max_open must be within (0, {}]",
                global_max
            )));
        }
        if self.max_idle > self.max_open {
            return Err(CollectorError::ConfigError("max_idle must be <= max_open".to_string()));
        }
        if self.conn_max_lifetime.is_zero() || self.conn_max_lifetime > Duration::from_secs(30 * 60) {
            return Err(CollectorError::ConfigError(
                "conn_max_lifetime must be within (0, 30min]".to_string(),
            ));
        }
        if self.conn_max_idle_time.is_zero() {
            return Err(CollectorError::ConfigError("conn_max_idle_time must be > 0".to_string()));
        }
        Ok(())
    }
}

struct Entry {
    pool: PgPool,
    limits: PoolLimits,
    stats: RwLock<PoolStats>,
}

pub struct PoolManager {
    global_max_connections: u32,
    pools: RwLock<HashMap<String, Arc<Entry>>>,
    health_check_interval: Duration,
}

impl PoolManager {
    pub fn new(global_max_connections: u32, health_check_interval: Duration) -> Self {
        Self {
            global_max_connections,
            pools: RwLock::new(HashMap::new()),
            health_check_interval,
        }
    }

    /// Keyed by `(driver, host, port, database)`; a second call with a
    /// matching key returns the existing pool rather than creating a new
    /// one.
    pub async fn get_pool(
        &self,
        key: &PoolKey,
        connection_string: &str,
        limits: PoolLimits,
    ) -> Result<PgPool, CollectorError> {
        let key_str = key.to_string();
        if let Some(entry) = self.pools.read().await.get(&key_str) {
            return Ok(entry.pool.clone());
        }

        limits.validate(self.global_max_connections)?;

        let mut in_use: u32 = 0;
        for entry in self.pools.read().await.values() {
            in_use += entry.limits.max_open;
        }
        if in_use + limits.max_open > self.global_max_connections {
            return Err(CollectorError::ConfigError(format!(
                "creating pool {} would exceed global_max_connections={}",
                key, self.global_max_connections
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(limits.max_open)
            .min_connections(limits.max_idle)
            .max_lifetime(limits.conn_max_lifetime)
            .idle_timeout(limits.conn_max_idle_time)
            .connect(connection_string)
            .await?;

        let entry = Arc::new(Entry {
            pool: pool.clone(),
            limits,
            stats: RwLock::new(PoolStats::default()),
        });

        self.pools.write().await.insert(key_str, entry);
        Ok(pool)
    }

    pub async fn stats(&self) -> Vec<(String, PoolStats)> {
        let mut out = Vec::new();
        for (key, entry) in self.pools.read().await.iter() {
            out.push((key.clone(), entry.stats.read().await.clone()));
        }
        out
    }

    /// Long-lived task: health-checks every pool at `health_check_interval`
    /// with a cheap liveness query. A pool flips unhealthy immediately on
    /// failure and back to healthy only after two consecutive successes.
    pub async fn run_health_checks(self: Arc<Self>) {
        let mut consecutive_successes: HashMap<String, u32> = HashMap::new();
        let mut ticker = interval(self.health_check_interval);
        loop {
            ticker.tick().await;
            let keys: Vec<String> = self.pools.read().await.keys().cloned().collect();
            for key in keys {
                let entry = match self.pools.read().await.get(&key).cloned() {
                    Some(e) => e,
                    None => continue,
                };
                let ok = sqlx::query("SELECT 1").fetch_one(&entry.pool).await.is_ok();
                let mut stats = entry.stats.write().await;
                stats.open = entry.pool.size();
                stats.idle = entry.pool.num_idle() as u32;
                stats.in_use = stats.open.saturating_sub(stats.idle);
                stats.last_health_check = Some(chrono::Utc::now());

                if ok {
                    let count = consecutive_successes.entry(key.clone()).or_insert(0);
                    *count += 1;
                    if *count >= 2 {
                        stats.healthy = true;
                    }
                } else {
                    consecutive_successes.insert(key.clone(), 0);
                    stats.healthy = false;
                    warn!(pool = %key, "health check failed");
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        for (key, entry) in self.pools.write().await.drain() {
            entry.pool.close().await;
            error!(pool = %key, "pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_reject_max_idle_above_max_open() {
        let limits = PoolLimits {
            max_open: 5,
            max_idle: 10,
            ..Default::default()
        };
        assert!(limits.validate(100).is_err());
    }

    #[test]
    fn limits_reject_max_open_above_global_cap() {
        let limits = PoolLimits {
            max_open: 200,
            ..Default::default()
        };
        assert!(limits.validate(100).is_err());
    }

    #[test]
    fn default_limits_are_valid() {
        assert!(PoolLimits::default().validate(100).is_ok());
    }
}
