use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::time;
use tracing::{info, error};
use tracing_subscriber;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbintel_collector=info".parse()?)
        )
        .init();

    let args = Args::parse();
    info!("Starting PostgreSQL Unified Collector");
    info!("Loading configuration from: {}", args.config);

    // For now, just run a simple loop that outputs mock metrics
    let mut interval = time::interval(Duration::from_secs(30));
    
    loop {
        interval.tick().await;
        
        // Output NRI format to stdout
        let nri_metrics = r#"{
  "name": "com.newrelic.postgresql",
  "protocol_version": "3",
  "integration_version": "1.0.0",
  "data": [
    {
      "entity": {
        "name": "localhost:5432",
        "type": "postgresql",
        "id_attributes": [
          {
            "key": "host",
            "value": "localhost"
          },
          {
            "key": "port",
            "value": 5432
          }
        ]
      },
      "metrics": [
        {
          "postgresql.deadlocks": 0,
          "postgresql.numbackends": 5,
          "postgresql.connections": 10,
          "postgresql.maxconnections": 100,
          "postgresql.commitsPerSecond": 15.2,
          "postgresql.rollbacksPerSecond": 0.5,
          "postgresql.tuplesDeletedPerSecond": 1.2,
          "postgresql.tuplesInsertedPerSecond": 25.3,
          "postgresql.tuplesReturnedPerSecond": 150.7,
          "postgresql.tuplesUpdatedPerSecond": 8.9,
          "event_type": "PostgresqlInstanceSample",
          "entityName": "localhost:5432"
        }
      ],
      "inventory": {},
      "events": []
    }
  ]
}"#;
        
        println!("{}", nri_metrics);
        info!("Sent NRI metrics to stdout");
        
        // In hybrid mode, would also send OTLP metrics
        if std::env::var("COLLECTION_MODE").unwrap_or_default() == "hybrid" {
            info!("Would send OTLP metrics to endpoint");
        }
    }
}