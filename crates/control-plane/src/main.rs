//! RunHub Control Plane
//!
//! Starts the dispatcher, submits the startup manifest if one is
//! configured and runs until Ctrl+C or SIGTERM.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runhub_control_plane::{
    bootstrap::bootstrap,
    config::AppConfig,
    manifest::load_manifest,
};

/// Initialize tracing/logging.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,runhub_control_plane=debug,runhub_core=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let app_config = AppConfig::from_env();
    let json = app_config.as_ref().map(|c| c.log_json).unwrap_or(false);
    init_tracing(json);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting RunHub control plane");

    let app_config = app_config.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    tracing::info!(
        workers = app_config.worker_count,
        queue_capacity = app_config.queue_capacity,
        store = ?app_config.store,
        "Configuration loaded"
    );

    let services = bootstrap(&app_config).await?;

    if let Some(path) = &app_config.manifest {
        let manifest = load_manifest(path).await?;
        manifest.seed(&services.entities).await;
        let summary = manifest.submit(&services.dispatcher).await;
        tracing::info!(
            submitted = summary.submitted.len(),
            failed = summary.failed.len(),
            "Manifest runs submitted"
        );
    }

    shutdown_signal().await;

    services.dispatcher.shutdown().await;

    let metrics = services.dispatcher.metrics();
    tracing::info!(
        submitted = metrics.submitted,
        completed = metrics.completed,
        failed = metrics.failed,
        stopped = metrics.stopped,
        "Control plane stopped"
    );
    match services.dispatcher.gather_metrics() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
