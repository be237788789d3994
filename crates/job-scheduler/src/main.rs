//! Job scheduler daemon binary.
//!
//! Builds the dependency graph on every tick, admits ready tasks within
//! capacity and launches them on this host.

use std::sync::Arc;

use anyhow::{Context, Result};
use job_core::config::DatabaseConfig;
use job_core::notify::{NatsNotifier, NullNotifier};
use job_core::signals::{redeliver, wait_for_termination};
use job_core::{JobStore, Notifier, PgJobStore, ResultExt};
use job_launcher::{ActiveRegistry, Launcher, LauncherConfig, LocalDispatcher};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use job_scheduler::control::{self, NatsControlListener};
use job_scheduler::{SchedulerConfig, SchedulerDaemon};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,job_scheduler=debug,job_launcher=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    tracing::info!("Starting job scheduler");

    // Load configuration
    let config = SchedulerConfig::from_env().context("Invalid SCHEDULER_ configuration")?;
    let db_config = DatabaseConfig::from_env().context("Invalid POSTGRES_ configuration")?;
    let launcher_config = LauncherConfig::from_env().context("Invalid LAUNCHER_ configuration")?;
    tracing::info!(
        capacity = config.capacity,
        rebuild_interval_secs = config.rebuild_interval_secs,
        nats_url = ?config.nats_url,
        output_root = %launcher_config.output_root.display(),
        sandbox = launcher_config.sandbox_enabled,
        "Scheduler configuration loaded"
    );

    // Job store
    let pool = db_config.create_pool().await.context("Failed to connect to PostgreSQL")?;
    let pg_store = PgJobStore::new(pool);
    pg_store.ensure_schema().await?;
    let store: Arc<dyn JobStore> = Arc::new(pg_store);

    // Optional NATS connection for control requests and status notifications
    let nats = match &config.nats_url {
        Some(url) => {
            let client = async_nats::connect(url.as_str())
                .await
                .with_context(|| format!("Failed to connect to NATS at {}", url))?;
            tracing::info!(url = %url, "Connected to NATS");
            Some(client)
        }
        None => None,
    };
    let notifier: Arc<dyn Notifier> = match &nats {
        Some(client) => Arc::new(NatsNotifier::new(client.clone(), Some(&config.status_subject))),
        None => Arc::new(NullNotifier),
    };

    // Wire the launcher as the dispatcher; a finished launch wakes the daemon
    let (control_handle, inbox) = control::channel();
    let registry = ActiveRegistry::new();
    let launcher = Arc::new(Launcher::new(launcher_config, store.clone(), notifier.clone()));
    let wake = control_handle.clone();
    let dispatcher = LocalDispatcher::new(launcher, registry.clone()).on_finish(move |_| wake.wake());

    let listener = match &nats {
        Some(client) => Some(
            NatsControlListener::new(client.clone(), config.control_subject.clone(), control_handle)
                .spawn()
                .await?,
        ),
        None => None,
    };

    let daemon = SchedulerDaemon::new(
        &config,
        store,
        Arc::new(registry),
        Arc::new(dispatcher),
        notifier,
        inbox,
    );

    let listener_done = async {
        match listener {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let signal = tokio::select! {
        result = daemon.run_until(std::future::pending::<()>()) => {
            result?;
            None
        }
        _ = listener_done => {
            tracing::error!("Control listener stopped");
            std::process::exit(1);
        }
        sig = wait_for_termination() => Some(sig?),
    };

    if let Some(client) = &nats {
        let _ = client.flush().await.log("flushing NATS connection");
    }
    tracing::info!("Scheduler stopped");

    if let Some(sig) = signal {
        redeliver(sig)?;
    }
    Ok(())
}
