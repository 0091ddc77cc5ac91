use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use resq_core::{AppState, EventType};
use resq_queue::http::{self, HttpState};
use resq_queue::{
    Collaborators, Config, EventStorage, IntervalTaskRegistry, LifecycleController,
    ManualNetworkMonitor, MemoryStorage, NetworkConfig, NetworkMonitor, PersonnelStatusSubmitter,
    ProbeNetworkMonitor, QueueProcessor, QueueService, QueueStore, SqliteStorage, StorageConfig,
    Submitters,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "resq-queue")]
#[command(about = "Offline event queue for responder status updates")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "resq-queue.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "resq_queue=info,resq_api=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        http_addr = %config.server.http_addr,
        api = %config.api.base_url,
        "Starting resq-queue"
    );

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run(config, MemoryStorage::default()).await?;
        }
        StorageConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite storage");
            let storage = SqliteStorage::new(path).await?;
            run(config, storage).await?;
        }
    }

    Ok(())
}

async fn run<S: EventStorage>(config: Config, storage: S) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();

    let mut manual_network = None;
    let mut probe = None;
    let network: Arc<dyn NetworkMonitor> = match &config.network {
        NetworkConfig::Probe {
            addr,
            interval_secs,
            timeout_ms,
        } => {
            info!(%addr, "Using TCP probe network monitor");
            let monitor = Arc::new(ProbeNetworkMonitor::new(
                addr.clone(),
                Duration::from_secs(*interval_secs),
                Duration::from_millis(*timeout_ms),
            ));
            monitor.start();
            probe = Some(monitor.clone());
            monitor
        }
        NetworkConfig::AlwaysOnline => {
            info!("Network assumed always online");
            Arc::new(ManualNetworkMonitor::online())
        }
        NetworkConfig::Manual => {
            info!("Using manual network monitor, starting offline");
            let monitor = Arc::new(ManualNetworkMonitor::offline());
            manual_network = Some(monitor.clone());
            monitor
        }
    };

    let lifecycle = Arc::new(LifecycleController::new(AppState::Active));
    let registry = Arc::new(IntervalTaskRegistry::new(
        Duration::from_secs(config.background.min_interval_secs),
        Duration::from_secs(config.background.budget_secs),
    ));

    let mut client = resq_api::Client::new(config.api.base_url.as_str())?
        .with_timeout(Duration::from_secs(config.api.timeout_secs));
    if let Some(token) = &config.api.token {
        client = client.with_token(token.as_str());
    }
    let submitters = Submitters::new().with(
        EventType::PersonnelStatus,
        PersonnelStatusSubmitter::new(client),
    );

    let store = QueueStore::open(storage).await?;
    let processor = QueueProcessor::new(
        store,
        Collaborators {
            network,
            lifecycle: lifecycle.clone(),
            registry,
        },
        submitters,
        config.processor(),
    );
    let service = QueueService::new(processor.clone());
    service.initialize().await?;

    let http_addr = config.server.http_addr;
    let app = http::router(HttpState {
        processor,
        manual_network,
        lifecycle,
    });
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    service.cleanup().await;
    if let Some(probe) = probe {
        probe.stop();
    }

    info!("resq-queue shut down complete");
    Ok(())
}
