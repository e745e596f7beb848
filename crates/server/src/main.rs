mod api;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scopehub_core::{
    load_config, AdapterBackend, AutofocusJournal, AutofocusManager, FileJournal, FocusState,
    HardwareAdapter, HttpTaskBackend, NullJournal, ProcessorChain, SimAdapter, StatusHub,
    TaskBackend, TaskManager,
};
use scopehub_core::processors::FrameMetadataProcessor;

use api::create_router;
use state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interval between published status snapshots
const STATUS_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("scopehub {}", VERSION);

    // Determine config path
    let config_path = std::env::var("SCOPEHUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    info!("Configuration loaded successfully");
    info!("Telescope id: {}", config.api.telescope_id);
    info!("Hardware adapter: {:?}", config.hardware.adapter);

    // Create hardware adapter
    let hardware: Arc<dyn HardwareAdapter> = match config.hardware.adapter {
        AdapterBackend::Sim => Arc::new(SimAdapter::new(config.hardware.images_dir.clone())),
        other => bail!(
            "hardware adapter {:?} is not available in this build; use `sim`",
            other
        ),
    };
    hardware
        .connect()
        .await
        .context("Failed to connect hardware")?;
    info!("Hardware connected");

    // Create backend client; the poll loop heartbeats from its first cycle
    let backend: Arc<dyn TaskBackend> = Arc::new(HttpTaskBackend::new(&config.api));

    // Autofocus journal and coordination state
    let journal: Arc<dyn AutofocusJournal> = match &config.autofocus.journal_path {
        Some(path) => Arc::new(FileJournal::new(path.clone())),
        None => Arc::new(NullJournal),
    };
    let focus_state = Arc::new(FocusState::new(journal.load_last_run()));
    let autofocus = Arc::new(AutofocusManager::new(
        focus_state,
        hardware.clone(),
        journal,
        config.autofocus.clone(),
    ));

    // Processor chain
    let chain = ProcessorChain::new(vec![Arc::new(FrameMetadataProcessor)]);

    // Create and start the task manager
    let manager = Arc::new(TaskManager::new(
        config.tasks.clone(),
        backend,
        hardware.clone(),
        chain,
        autofocus,
    ));
    manager.start();
    info!("Task manager started");

    // Status hub publishing snapshots for /status and /ws
    let status_hub = Arc::new(StatusHub::new(manager.clone()));
    let (publisher_shutdown_tx, _) = broadcast::channel(1);
    status_hub.spawn_publisher(STATUS_PUBLISH_INTERVAL, publisher_shutdown_tx.subscribe());

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        manager.clone(),
        status_hub,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    let _ = publisher_shutdown_tx.send(());
    manager.stop().await;
    hardware.disconnect().await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
