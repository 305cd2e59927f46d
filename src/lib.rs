pub mod controller;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod registry;
pub mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use controller::{Defaults, WorkspaceController};
use orchestrator::{HelmKubernetesOrchestrator, Orchestrator};
use registry::{Registry, SqliteRegistry};
use settings::Settings;

/// Wire up the Registry, the orchestrator adapter, and the controller, then
/// serve the HTTP surface until a shutdown signal arrives. One process-wide
/// registry handle and one orchestrator instance, created once and shared
/// via `Arc`.
pub async fn run(settings: Settings) -> Result<()> {
    // Required for kube-rs HTTPS connections (rustls-tls feature).
    rustls::crypto::ring::default_provider().install_default().ok();

    let registry: Arc<dyn Registry> = Arc::new(
        SqliteRegistry::connect(&settings.database.path)
            .await
            .context("failed to open registry database")?,
    );

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(
        HelmKubernetesOrchestrator::connect(
            settings.kubernetes.chart_path.clone(),
            settings.kubernetes.kubeconfig.clone(),
        )
        .await
        .context("failed to connect to the Kubernetes cluster")?,
    );

    let defaults = Defaults::new(settings.kubernetes.ingress_host_template.clone());
    let controller = Arc::new(WorkspaceController::new(registry.clone(), orchestrator, defaults));

    let state = http::AppState {
        controller,
        version: settings.version.clone(),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP surface listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down, closing registry");
    registry.close().await;
    Ok(())
}

/// Waits for SIGINT or (on unix) SIGTERM so the process can close its
/// Registry handle cleanly before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
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
