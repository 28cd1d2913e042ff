//! Gateway service entry point.

use anyhow::Result;
use gateway::memory::MemoryStack;
use gateway::session::SessionRegistry;
use gateway::ws_server::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting gateway service");

    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8082".to_string())
        .parse()?;
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9093".to_string())
        .parse()?;
    let algo_root = PathBuf::from(env::var("ALGO_ROOT").unwrap_or_else(|_| "algos".to_string()));
    let pnl_root = PathBuf::from(env::var("PNL_ROOT").unwrap_or_else(|_| "store".to_string()));

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  ALGO_ROOT: {}", algo_root.display());
    info!("  PNL_ROOT: {}", pnl_root.display());

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Deployments wire the server's real manager singletons here; the
    // in-memory stack keeps the binary bootable for protocol work.
    let stack = MemoryStack::new();
    let services = stack.services(algo_root, pnl_root);
    let sessions = Arc::new(SessionRegistry::new());
    let state = Arc::new(AppState {
        services: services.clone(),
        sessions,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    let mut shutdown_rx = services.shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("Received termination signal"),
                _ = shutdown_rx.changed() => info!("Shutdown requested by admin session"),
            }
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
