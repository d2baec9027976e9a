//! Drives the staged pipeline (receivers -> processor chain -> exporters)
//! built from the C1-C15 components, as an alternative to the legacy
//! fixed-interval collection loop in `unified_collector`. Receivers push
//! batches onto a shared channel; this binary reads that channel, runs each
//! batch through `PipelineRuntime::process` and fans the result out with
//! `PipelineRuntime::export`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbintel_collector::config::{CollectorConfig, SamplingMode};
use dbintel_collector::health::{ExporterHealth, HealthServer, HealthStatus, ReceiverHealth};
use dbintel_collector::SanitizingStage;
use dbintel_core::pdata::Batch;
use dbintel_core::traits::{Exporter, Processor, Receiver};
use dbintel_core::{PoolKey, SamplingRule};
use dbintel_extensions::{ActiveSessionSampler, AshReceiver, AshReceiverConfig};
use dbintel_nri_adapter::{NriSink, NriStreamExporter, NriStreamExporterConfig};
use dbintel_otel_adapter::{OtlpExporter, OtlpExporterConfig};
use dbintel_pipeline::{BatchProcessor, BatchProcessorConfig, MemoryLimiter, MemoryLimiterConfig, PipelineRuntime, PipelineRuntimeConfig};
use dbintel_processors::{
    AdaptiveSampler, AdaptiveSamplerStage, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStage, CorrelatorConfig,
    CorrelatorStage, CostControl, CostControlConfig, CostControlStage, OhiTransform, OhiTransformConfig,
    OhiTransformStage, PlanParser, PlanParserConfig, PlanParserStage, QueryCorrelator,
};
use dbintel_prometheus_adapter::{PrometheusExporter, PrometheusExporterConfig};
use dbintel_query_engine::{build_query_library, FeatureDetector, PoolLimits, PoolManager, QuerySelector, SqlReceiver, SqlReceiverConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "collector-config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Health check server address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

fn sampling_rules(config: &CollectorConfig) -> Vec<SamplingRule> {
    config
        .sampling
        .rules
        .iter()
        .enumerate()
        .map(|(i, rule)| SamplingRule {
            name: format!("legacy_rule_{i}"),
            condition: rule.condition.clone(),
            sample_rate_percent: rule.sample_rate * 100.0,
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(true).with_level(true))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    info!("Starting pipeline collector");

    let config = CollectorConfig::from_file(&args.config)?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let pool_manager = PoolManager::new(config.max_connections, Duration::from_secs(30));
    let pool_key = PoolKey {
        driver: "postgres".to_string(),
        host: config.host.clone(),
        port: config.port,
        database: config.databases.first().cloned().unwrap_or_else(|| "postgres".to_string()),
    };
    let pool = pool_manager
        .get_pool(&pool_key, &config.connection_string, PoolLimits::default())
        .await?;

    let feature_detector = Arc::new(FeatureDetector::new(Duration::from_secs(300), Duration::from_secs(5)));
    {
        let mut conn = pool.acquire().await?;
        feature_detector.get_or_detect(&mut conn).await;
    }

    let query_library = build_query_library(&config.databases, config.query_monitoring_count_threshold.max(1) as u32);
    let selector = Arc::new(QuerySelector::new(query_library.clone()));

    let mut resource_attributes = dbintel_core::pdata::AttributeMap::new();
    resource_attributes.insert(
        "host.name".to_string(),
        dbintel_core::pdata::AttributeValue::String(config.host.clone()),
    );

    let mut categories: Vec<String> = query_library.iter().map(|d| d.category.clone()).collect();
    categories.sort();
    categories.dedup();

    let (batch_tx, mut batch_rx) = mpsc::channel::<Batch>(256);

    let sql_receiver = SqlReceiver::new(
        SqlReceiverConfig {
            categories,
            tick_interval: Duration::from_secs(config.collection_interval_secs),
            resource_attributes,
        },
        pool.clone(),
        feature_detector.clone(),
        selector.clone(),
        query_library,
        batch_tx.clone(),
    );

    let ash_sampler = Arc::new(ActiveSessionSampler::new(
        Duration::from_secs(config.ash_sample_interval_secs.max(1)),
        Duration::from_secs(config.ash_retention_hours.max(1) * 3600),
    ));
    let ash_receiver = AshReceiver::new(ash_sampler, pool.clone(), AshReceiverConfig::default(), batch_tx.clone());

    let mut receivers: Vec<Box<dyn Receiver>> = vec![Box::new(sql_receiver)];
    if config.enable_ash {
        receivers.push(Box::new(ash_receiver));
    }

    let adaptive_sampler = Arc::new(AdaptiveSampler::new(
        sampling_rules(&config),
        match config.sampling.mode {
            SamplingMode::Fixed => config.sampling.base_sample_rate * 100.0,
            SamplingMode::Adaptive => config.sampling.base_sample_rate * 100.0,
        },
        0,
    ));
    let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let cost_control = Arc::new(CostControl::new(CostControlConfig::default()));
    let plan_parser = Arc::new(PlanParser::new(PlanParserConfig::default()));
    let correlator = Arc::new(QueryCorrelator::new(CorrelatorConfig::default()));
    let ohi_transform = Arc::new(OhiTransform::new(OhiTransformConfig::default()));

    let processors: Vec<Box<dyn Processor>> = vec![
        Box::new(MemoryLimiter::new(MemoryLimiterConfig::default())),
        Box::new(SanitizingStage::new(dbintel_collector::sanitizer::SanitizationMode::Smart)),
        Box::new(CircuitBreakerStage::new(circuit_breaker)),
        Box::new(AdaptiveSamplerStage::new(adaptive_sampler)),
        Box::new(CostControlStage::new(cost_control)),
        Box::new(PlanParserStage::new(plan_parser)),
        Box::new(CorrelatorStage::new(correlator)),
        Box::new(OhiTransformStage::new(ohi_transform)),
        Box::new(BatchProcessor::new(BatchProcessorConfig::default())),
    ];

    let mut exporters: Vec<Box<dyn Exporter>> = Vec::new();
    if let Some(otlp_config) = config.outputs.otlp.as_ref().filter(|c| c.enabled) {
        exporters.push(Box::new(OtlpExporter::new(OtlpExporterConfig {
            endpoint: otlp_config.endpoint.clone(),
            ..OtlpExporterConfig::default()
        })));
    }
    if config.outputs.nri.as_ref().filter(|c| c.enabled).is_some() {
        exporters.push(Box::new(NriStreamExporter::new(NriStreamExporterConfig {
            sink: NriSink::Stdout,
            ..NriStreamExporterConfig::default()
        })));
    }
    // Scrape-style: `export` just updates the registry; rendering it onto
    // an HTTP route is left to the self-metrics surface in `health.rs`.
    exporters.push(Box::new(PrometheusExporter::new(PrometheusExporterConfig::default())));

    let mut runtime = PipelineRuntime::new(PipelineRuntimeConfig::default(), receivers, processors, exporters);
    runtime.start().await?;
    info!("Pipeline started: {} receivers feeding the processor chain", 1 + config.enable_ash as usize);

    let health_status = Arc::new(tokio::sync::RwLock::new(HealthStatus::default()));
    let health_server = HealthServer::new(health_status.clone());
    let health_addr: SocketAddr = args.health_addr.parse()?;
    tokio::spawn(async move {
        if let Err(e) = health_server.start(health_addr).await {
            error!("Health server error: {}", e);
        }
    });
    info!("Health check server started on {}", args.health_addr);

    loop {
        tokio::select! {
            maybe_batch = batch_rx.recv() => {
                let Some(batch) = maybe_batch else {
                    warn!("all receivers have dropped their batch sender, stopping");
                    break;
                };
                match runtime.process(batch).await {
                    Ok(processed) if processed.is_empty() => {}
                    Ok(processed) => {
                        if let Err(e) = runtime.export(&processed).await {
                            error!("export failed: {}", e);
                            let mut status = health_status.write().await;
                            let exporter = status.exporters.entry("pipeline".to_string()).or_insert_with(ExporterHealth::default);
                            exporter.consecutive_failures += 1;
                        } else {
                            let mut status = health_status.write().await;
                            let exporter = status.exporters.entry("pipeline".to_string()).or_insert_with(ExporterHealth::default);
                            exporter.total_exported += 1;
                            exporter.consecutive_failures = 0;
                            exporter.last_success = Some(chrono::Utc::now());
                        }
                    }
                    Err(e) => error!("processing failed: {}", e),
                }
                let mut status = health_status.write().await;
                status.receivers.insert(
                    "sql".to_string(),
                    ReceiverHealth {
                        last_successful_tick: Some(chrono::Utc::now()),
                        tick_interval: Some(chrono::Duration::seconds(config.collection_interval_secs as i64)),
                    },
                );
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, gracefully stopping...");
                break;
            }
        }
    }

    runtime.shutdown().await?;
    info!("Pipeline collector shutdown complete");
    Ok(())
}
