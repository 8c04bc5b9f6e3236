mod api;
mod bootstrap;
mod dispatch;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use equiptrack_core::config::{AppConfig, LoadOptions};
use tokio::sync::Notify;
use tracing::{info, warn};

fn init_logging(config: &AppConfig) {
    use equiptrack_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(true).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging has to be up before bootstrap emits anything.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "equiptrack-server listening"
    );

    let stop = Arc::new(Notify::new());
    let server = tokio::spawn({
        let stop = stop.clone();
        let router = app.router();
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.notified().await })
                .await
        }
    });

    tokio::signal::ctrl_c().await?;
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "shutdown requested; draining in-flight requests"
    );
    stop.notify_one();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "in-flight requests did not finish within the grace period"
        ),
    }

    app.db_pool.close().await;
    info!(event_name = "system.server.stopped", correlation_id = "shutdown", "equiptrack-server stopped");
    Ok(())
}
