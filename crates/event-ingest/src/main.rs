//! Event receiver binary.
//!
//! Subscribes to the event intake subject and persists every execution event
//! through the ingestion front end.

use std::sync::Arc;

use anyhow::{Context, Result};
use job_core::config::DatabaseConfig;
use job_core::signals::{redeliver, wait_for_termination};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_ingest::{EventStore, IngestConfig, IngestFrontEnd, NatsIntake, PgEventStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,event_ingest=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    tracing::info!("Starting event receiver");

    // Load configuration
    let config = IngestConfig::from_env().context("Invalid INGEST_ configuration")?;
    let db_config = DatabaseConfig::from_env().context("Invalid POSTGRES_ configuration")?;
    tracing::info!(
        workers = config.workers,
        queue_size = config.queue_size,
        max_messages = config.max_messages,
        subject = %config.subject,
        "Event receiver configuration loaded"
    );

    // Event store
    let pool = db_config.create_pool().await.context("Failed to connect to PostgreSQL")?;
    let pg_store = PgEventStore::new(pool);
    pg_store.ensure_schema().await?;
    let store: Arc<dyn EventStore> = Arc::new(pg_store);

    // Intake
    let client = async_nats::connect(config.nats_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;
    let (tx, rx) = mpsc::channel(config.intake_buffer.max(1));
    let intake = NatsIntake::new(client, config.subject.clone()).spawn(tx).await?;

    let front_end = tokio::spawn(IngestFrontEnd::new(store, &config).run(rx));

    tokio::select! {
        result = front_end => {
            match result {
                Ok(Ok(())) => tracing::error!("Event front end stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Event front end failed"),
                Err(e) => tracing::error!(error = %e, "Event front end crashed"),
            }
            std::process::exit(1);
        }
        _ = intake => {
            tracing::error!("Event intake stopped");
            std::process::exit(1);
        }
        sig = wait_for_termination() => {
            let sig = sig?;
            tracing::info!("Event receiver stopped");
            redeliver(sig)?;
        }
    }

    Ok(())
}
