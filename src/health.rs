//! C15: the self-metrics/health HTTP surface. `/health` and `/health/ready`
//! gate on receiver tick freshness and exporter failure streaks;
//! `/health/live` only reflects process liveness; `/metrics` renders the
//! Prometheus text exposition for self-metrics (§4.15).

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const DEFAULT_TICK_GRACE_MULTIPLIER: u32 = 3;
const DEFAULT_MAX_EXPORTER_FAILURES: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct ReceiverHealth {
    pub last_successful_tick: Option<chrono::DateTime<chrono::Utc>>,
    pub tick_interval: Option<chrono::Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ExporterHealth {
    pub consecutive_failures: u32,
    pub total_exported: u64,
    pub last_success: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthStatus {
    pub receivers: HashMap<String, ReceiverHealth>,
    pub exporters: HashMap<String, ExporterHealth>,
    pub cache_sizes: HashMap<String, usize>,
    pub rate_limiter_decisions: HashMap<String, (u64, u64)>,
    pub circuit_states: HashMap<String, String>,
    pub pipeline_queue_depth: usize,
}

impl HealthStatus {
    fn tick_grace(&self, interval: chrono::Duration) -> chrono::Duration {
        interval * DEFAULT_TICK_GRACE_MULTIPLIER as i32
    }

    /// All receivers ticked successfully within their grace window and no
    /// exporter has exceeded the consecutive-failure threshold.
    pub fn is_healthy(&self) -> bool {
        let now = chrono::Utc::now();
        let receivers_ok = self.receivers.values().all(|r| match (r.last_successful_tick, r.tick_interval) {
            (Some(last), Some(interval)) => now - last < self.tick_grace(interval),
            _ => false,
        });
        let exporters_ok = self
            .exporters
            .values()
            .all(|e| e.consecutive_failures < DEFAULT_MAX_EXPORTER_FAILURES);
        receivers_ok && exporters_ok
    }

    pub fn is_ready(&self) -> bool {
        self.is_healthy() && self.exporters.values().any(|e| e.total_exported > 0)
    }
}

pub struct HealthServer {
    status: Arc<RwLock<HealthStatus>>,
}

impl HealthServer {
    pub fn new(status: Arc<RwLock<HealthStatus>>) -> Self {
        Self { status }
    }

    pub async fn start(self, addr: SocketAddr) -> Result<(), hyper::Error> {
        let status = self.status.clone();

        let make_svc = make_service_fn(move |_conn| {
            let status = status.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, status.clone()))) }
        });

        let server = Server::bind(&addr).serve(make_svc);
        info!("Health check server listening on {}", addr);

        server.await
    }
}

async fn handle_request(req: Request<Body>, status: Arc<RwLock<HealthStatus>>) -> Result<Response<Body>, Infallible> {
    let response = match req.uri().path() {
        "/health" => health_check(status).await,
        "/health/live" => liveness_check(),
        "/health/ready" => readiness_check(status).await,
        "/metrics" => prometheus_metrics(status).await,
        _ => not_found(),
    };

    Ok(response)
}

fn json_response(code: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(code)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn health_check(status: Arc<RwLock<HealthStatus>>) -> Response<Body> {
    let status = status.read().await;
    if status.is_healthy() {
        json_response(StatusCode::OK, serde_json::json!({"status": "healthy"}))
    } else {
        json_response(StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({"status": "unhealthy"}))
    }
}

fn liveness_check() -> Response<Body> {
    json_response(StatusCode::OK, serde_json::json!({"status": "alive"}))
}

async fn readiness_check(status: Arc<RwLock<HealthStatus>>) -> Response<Body> {
    let status = status.read().await;
    if status.is_ready() {
        json_response(StatusCode::OK, serde_json::json!({"status": "ready"}))
    } else {
        json_response(StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({"status": "not_ready"}))
    }
}

async fn prometheus_metrics(status: Arc<RwLock<HealthStatus>>) -> Response<Body> {
    let status = status.read().await;
    let mut out = String::new();

    out.push_str("# HELP dbintel_up Whether the collector is up and running\n");
    out.push_str("# TYPE dbintel_up gauge\n");
    out.push_str(&format!("dbintel_up {}\n", if status.is_healthy() { 1 } else { 0 }));

    out.push_str("# HELP dbintel_exporter_sent_total Total records exported, per exporter\n");
    out.push_str("# TYPE dbintel_exporter_sent_total counter\n");
    for (name, exporter) in &status.exporters {
        out.push_str(&format!(
            "dbintel_exporter_sent_total{{exporter=\"{name}\"}} {}\n",
            exporter.total_exported
        ));
    }

    out.push_str("# HELP dbintel_exporter_consecutive_failures Current consecutive failure streak, per exporter\n");
    out.push_str("# TYPE dbintel_exporter_consecutive_failures gauge\n");
    for (name, exporter) in &status.exporters {
        out.push_str(&format!(
            "dbintel_exporter_consecutive_failures{{exporter=\"{name}\"}} {}\n",
            exporter.consecutive_failures
        ));
    }

    out.push_str("# HELP dbintel_cache_size Current entry count, per named cache\n");
    out.push_str("# TYPE dbintel_cache_size gauge\n");
    for (name, size) in &status.cache_sizes {
        out.push_str(&format!("dbintel_cache_size{{cache=\"{name}\"}} {}\n", size));
    }

    out.push_str("# HELP dbintel_rate_limiter_decisions_total Success/reject counts, per database\n");
    out.push_str("# TYPE dbintel_rate_limiter_decisions_total counter\n");
    for (database, (success, reject)) in &status.rate_limiter_decisions {
        out.push_str(&format!(
            "dbintel_rate_limiter_decisions_total{{database=\"{database}\",outcome=\"allowed\"}} {}\n",
            success
        ));
        out.push_str(&format!(
            "dbintel_rate_limiter_decisions_total{{database=\"{database}\",outcome=\"rejected\"}} {}\n",
            reject
        ));
    }

    out.push_str("# HELP dbintel_circuit_state Current circuit phase, per database (0=closed,1=half_open,2=open)\n");
    out.push_str("# TYPE dbintel_circuit_state gauge\n");
    for (database, phase) in &status.circuit_states {
        let code = match phase.as_str() {
            "Open" => 2,
            "HalfOpen" => 1,
            _ => 0,
        };
        out.push_str(&format!("dbintel_circuit_state{{database=\"{database}\"}} {}\n", code));
    }

    out.push_str("# HELP dbintel_pipeline_queue_depth Records buffered in the pipeline\n");
    out.push_str("# TYPE dbintel_pipeline_queue_depth gauge\n");
    out.push_str(&format!("dbintel_pipeline_queue_depth {}\n", status.pipeline_queue_depth));

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(out))
        .unwrap()
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("404 - Not Found"))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_every_receiver_within_its_tick_grace() {
        let mut status = HealthStatus::default();
        status.receivers.insert(
            "sql".into(),
            ReceiverHealth {
                last_successful_tick: Some(chrono::Utc::now() - chrono::Duration::seconds(5)),
                tick_interval: Some(chrono::Duration::seconds(1)),
            },
        );
        assert!(!status.is_healthy());

        status.receivers.insert(
            "sql".into(),
            ReceiverHealth {
                last_successful_tick: Some(chrono::Utc::now()),
                tick_interval: Some(chrono::Duration::seconds(1)),
            },
        );
        assert!(status.is_healthy());
    }

    #[test]
    fn unhealthy_once_an_exporter_exceeds_failure_threshold() {
        let mut status = HealthStatus::default();
        status.exporters.insert(
            "otlp".into(),
            ExporterHealth {
                consecutive_failures: DEFAULT_MAX_EXPORTER_FAILURES,
                ..Default::default()
            },
        );
        assert!(!status.is_healthy());
    }

    #[test]
    fn ready_requires_at_least_one_successful_export() {
        let mut status = HealthStatus::default();
        status.exporters.insert("otlp".into(), ExporterHealth::default());
        assert!(!status.is_ready());

        status.exporters.insert(
            "otlp".into(),
            ExporterHealth {
                total_exported: 1,
                ..Default::default()
            },
        );
        assert!(status.is_ready());
    }
}
