//! Application wiring: services, lifecycle, auth seed and HTTP server.
//!
//! # Data Flow
//! ```text
//! ImbiConfig
//!     → Services::from_config → Orchestrator::startup
//!     → auto-seed auth data (graph store)
//!     → HttpServer::run until SIGINT/SIGTERM
//!     → Orchestrator::shutdown
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::auth::{self, SeedSummary};
use crate::config::ImbiConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::spawn_signal_listener;
use crate::lifecycle::{ManagedService, Shutdown, ShutdownReport, StartupError};
use crate::security::rate_limit::RateLimitParseError;
use crate::services::{GraphError, GraphStore, Services};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("authentication seeding failed: {0}")]
    Seed(#[from] GraphError),

    #[error("invalid rate limit: {0}")]
    RateLimit(#[from] RateLimitParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind the configured address and serve until a termination signal.
pub async fn serve(config: ImbiConfig) -> Result<ShutdownReport, AppError> {
    let listener = TcpListener::bind(config.server.bind_address()).await?;

    let shutdown = Shutdown::new();
    let signals = spawn_signal_listener(shutdown.clone());
    let result = run(config, listener, shutdown).await;
    signals.abort();
    result
}

/// Start services, serve on `listener` until `shutdown` fires, then close services.
///
/// Services that came up are always closed before an error is returned.
pub async fn run(
    config: ImbiConfig,
    listener: TcpListener,
    shutdown: Shutdown,
) -> Result<ShutdownReport, AppError> {
    let services = Arc::new(Services::from_config(&config));
    let server = HttpServer::new(&config, Arc::clone(&services))?;
    let orchestrator = services.orchestrator();

    orchestrator.startup().await?;

    if config.auth.auto_seed {
        if let Err(e) = auto_seed(&services.graph).await {
            tracing::error!(error = %e, "Auto-seeding failed");
            orchestrator.shutdown().await;
            return Err(e.into());
        }
    }

    let served = if shutdown.is_triggered() {
        tracing::info!("Shutdown requested during startup, not serving");
        Ok(())
    } else {
        server.run(listener, shutdown).await
    };
    let report = orchestrator.shutdown().await;
    served?;
    Ok(report)
}

/// Seed auth data unless permissions already exist.
async fn auto_seed(graph: &GraphStore) -> Result<Option<SeedSummary>, GraphError> {
    if auth::check_if_seeded(graph).await? {
        tracing::debug!("Authentication system already seeded");
        return Ok(None);
    }
    tracing::info!("Auto-seeding authentication system");
    auth::bootstrap_auth_system(graph).await.map(Some)
}

/// Seed auth data using only the graph store.
pub async fn bootstrap_auth(config: &ImbiConfig) -> Result<SeedSummary, AppError> {
    let graph = GraphStore::new(config.neo4j.clone());
    graph.initialize().await.map_err(StartupError::Faulted)?;

    let result = auth::bootstrap_auth_system(&graph).await;
    if let Err(e) = graph.close().await {
        tracing::warn!(error = %e, "Failed to close graph store");
    }
    Ok(result?)
}
