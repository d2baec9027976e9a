//! C1: probes a database for extensions, capabilities and version, and
//! publishes the result as an immutable, atomically-replaced `FeatureSet`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbintel_core::{CapabilityValue, DetectionError, FeatureSet};
use sqlx::{PgConnection, Row};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::warn;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

/// Capabilities checked via a closed list of session/global settings. Kept
/// closed per §4.1: arbitrary `SHOW`/`current_setting` reads are never
/// exposed to query definitions.
const CHECKED_CAPABILITIES: &[&str] = &["track_io_timing", "shared_preload_libraries", "is_superuser"];

pub struct FeatureDetector {
    cache: RwLock<Option<(FeatureSet, std::time::Instant)>>,
    cache_duration: Duration,
    probe_timeout: Duration,
}

impl Default for FeatureDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION, DEFAULT_PROBE_TIMEOUT)
    }
}

impl FeatureDetector {
    pub fn new(cache_duration: Duration, probe_timeout: Duration) -> Self {
        Self {
            cache: RwLock::new(None),
            cache_duration,
            probe_timeout,
        }
    }

    /// Reads from the cache while `now - lastDetection < cache_duration`;
    /// otherwise runs a fresh `detect`.
    pub async fn get_or_detect(&self, conn: &mut PgConnection) -> Arc<FeatureSet> {
        if let Some(cached) = self.cached_if_fresh().await {
            return Arc::new(cached);
        }
        let set = self.detect(conn).await;
        Arc::new(set)
    }

    pub async fn cached(&self) -> Option<FeatureSet> {
        self.cache.read().await.as_ref().map(|(fs, _)| fs.clone())
    }

    async fn cached_if_fresh(&self) -> Option<FeatureSet> {
        let guard = self.cache.read().await;
        match &*guard {
            Some((fs, at)) if at.elapsed() < self.cache_duration => Some(fs.clone()),
            _ => None,
        }
    }

    /// Runs the three probes in sequence, each bounded by `probe_timeout`.
    /// Detection is idempotent and never blocks past its own deadline.
    pub async fn detect(&self, conn: &mut PgConnection) -> FeatureSet {
        let mut errors = Vec::new();

        let server_version = match self.probe_version(conn).await {
            Ok(v) => v,
            Err(e) => {
                errors.push(DetectionError {
                    phase: "version".to_string(),
                    message: e.to_string(),
                });
                "0".to_string()
            }
        };

        let extensions = match self.probe_extensions(conn).await {
            Ok(e) => e,
            Err(e) => {
                errors.push(DetectionError {
                    phase: "extensions".to_string(),
                    message: e.to_string(),
                });
                HashMap::new()
            }
        };

        let capabilities = match self.probe_capabilities(conn).await {
            Ok(c) => c,
            Err(e) => {
                errors.push(DetectionError {
                    phase: "capabilities".to_string(),
                    message: e.to_string(),
                });
                HashMap::new()
            }
        };

        let cloud_provider = self.probe_cloud_provider(conn).await.ok().flatten();

        let feature_set = FeatureSet {
            server_version,
            extensions,
            capabilities,
            cloud_provider,
            detected_at: chrono::Utc::now(),
            errors,
        };

        let mut guard = self.cache.write().await;
        *guard = Some((feature_set.clone(), std::time::Instant::now()));
        feature_set
    }

    async fn probe_version(&self, conn: &mut PgConnection) -> Result<String, sqlx::Error> {
        let row = timeout(
            self.probe_timeout,
            sqlx::query("SHOW server_version").fetch_one(&mut *conn),
        )
        .await
        .map_err(|_| sqlx::Error::PoolTimedOut)??;
        let raw: String = row.try_get(0)?;
        // "14.9 (Ubuntu ...)" -> "14.9"
        Ok(raw.split_whitespace().next().unwrap_or("0").to_string())
    }

    async fn probe_extensions(&self, conn: &mut PgConnection) -> Result<HashMap<String, String>, sqlx::Error> {
        let rows = timeout(
            self.probe_timeout,
            sqlx::query("SELECT extname, extversion FROM pg_extension").fetch_all(&mut *conn),
        )
        .await
        .map_err(|_| sqlx::Error::PoolTimedOut)??;

        let mut extensions = HashMap::new();
        for row in rows {
            let name: String = row.try_get("extname")?;
            let version: String = row.try_get("extversion")?;
            extensions.insert(name, version);
        }
        Ok(extensions)
    }

    async fn probe_capabilities(&self, conn: &mut PgConnection) -> Result<HashMap<String, CapabilityValue>, sqlx::Error> {
        let mut capabilities = HashMap::new();
        for name in CHECKED_CAPABILITIES {
            let query = format!("SELECT current_setting('{}', true)", name.replace('\'', ""));
            match timeout(self.probe_timeout, sqlx::query(&query).fetch_optional(&mut *conn)).await {
                Ok(Ok(Some(row))) => {
                    let raw: Option<String> = row.try_get(0).ok();
                    if let Some(raw) = raw {
                        let value = match raw.as_str() {
                            "on" | "true" => CapabilityValue::Bool(true),
                            "off" | "false" => CapabilityValue::Bool(false),
                            other => CapabilityValue::Text(other.to_string()),
                        };
                        capabilities.insert((*name).to_string(), value);
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!("capability probe for {} failed: {}", name, e);
                }
                Err(_) => {
                    warn!("capability probe for {} timed out", name);
                }
            }
        }
        Ok(capabilities)
    }

    async fn probe_cloud_provider(&self, conn: &mut PgConnection) -> Result<Option<String>, sqlx::Error> {
        let is_rds = sqlx::query("SELECT 1 FROM pg_settings WHERE name = 'rds.superuser_reserved_connections'")
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        Ok(if is_rds { Some("aws-rds".to_string()) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_match_spec_defaults() {
        let detector = FeatureDetector::default();
        assert_eq!(detector.cache_duration, Duration::from_secs(300));
        assert_eq!(detector.probe_timeout, Duration::from_secs(3));
    }
}
