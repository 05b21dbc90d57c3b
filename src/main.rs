use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon::config::Config;
use beacon::ingress;
use beacon::relay::{Relay, RelayTasks};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Loaded configuration\n{}", config.relay);

    let relay = Arc::new(
        Relay::new(Arc::new(config.relay.clone())).context("Failed to create relay")?,
    );
    let tasks = RelayTasks::new();

    let app = ingress::create_ingress_router(Arc::clone(&relay), tasks.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🚀 Forwarder listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Forwarder server failed")?;

    info!("Stopped accepting requests, draining relays...");
    let report = tasks
        .shutdown_closing(config.shutdown_grace, relay.throttle())
        .await;
    if report.abandoned > 0 {
        warn!("{} relays abandoned at shutdown", report.abandoned);
    } else {
        info!("All relays finished");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
