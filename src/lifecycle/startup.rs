//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Bind the listener and run the server until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use thiserror::Error;

use crate::config::{resolve_config, Cli, ConfigError};
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the proxy from command-line arguments until shutdown.
pub async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = resolve_config(&cli)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream.url,
        bind_address = %config.listener.bind_address,
        tunnel_mode = ?config.tunnel.mode,
        "emby-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config)?;
    let listener = Listener::bind(&server.config().listener).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
