//! Prism control-plane server entry point.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_admin::AdminFsm;
use prism_server::{create_router, spawn_heartbeat_sweep, AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,prism=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Prism Control Plane v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/prism.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        info!("Loading configuration from {}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        info!("Using default configuration");
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        config
    };

    // Restore admin state from the last snapshot, when one exists
    let fsm = Arc::new(AdminFsm::new());
    if let Some(path) = &config.snapshot_path {
        if std::path::Path::new(path).exists() {
            let bytes = std::fs::read(path)?;
            fsm.restore(&bytes)?;
            let (index, term) = fsm.last_applied();
            info!(snapshot = %path, index, term, "Restored admin state");
        }
    }

    let state = AppState::with_fsm(config.clone(), fsm.clone());
    let sweep = spawn_heartbeat_sweep(state.clone());

    let router = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Control plane listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain connected patterns, then persist a final snapshot.
    info!("Shutting down; draining connected patterns");
    let _ = sweep.send(true);
    for session in state.sessions.list() {
        let (drained, aborted) = session
            .drain(config.drain_timeout_seconds, "server shutdown")
            .await;
        info!(pattern_id = %session.pattern_id, drained, aborted, "Pattern drained");
    }

    if let Some(path) = &config.snapshot_path {
        match fsm.snapshot() {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!(snapshot = %path, error = %e, "Snapshot write failed");
                } else {
                    info!(snapshot = %path, "Admin state persisted");
                }
            }
            Err(e) => warn!(error = %e, "Snapshot serialization failed"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
