//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize every backing service concurrently
//! - Capture each outcome instead of short-circuiting on the first fault
//! - Roll back services that came up when a sibling did not
//!
//! # Design Decisions
//! - Fail fast: any startup failure is fatal to the process
//! - The first failure in startup order is the one reported

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use thiserror::Error;

use crate::lifecycle::service::{ManagedService, Readiness, ServiceError};
use crate::lifecycle::Orchestrator;
use crate::observability::metrics;

/// Per-service result of an initialization attempt.
#[derive(Debug)]
pub enum InitOutcome {
    Ready,
    /// Clean "could not initialize" without a fault.
    Unavailable,
    Faulted(ServiceError),
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitOutcome::Ready)
    }

    fn label(&self) -> &'static str {
        match self {
            InitOutcome::Ready => "ready",
            InitOutcome::Unavailable => "unavailable",
            InitOutcome::Faulted(_) => "faulted",
        }
    }
}

impl From<Result<Readiness, ServiceError>> for InitOutcome {
    fn from(result: Result<Readiness, ServiceError>) -> Self {
        match result {
            Ok(Readiness::Ready) => InitOutcome::Ready,
            Ok(Readiness::Unavailable) => InitOutcome::Unavailable,
            Err(e) => InitOutcome::Faulted(e),
        }
    }
}

/// Fatal startup failure, returned after rollback.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A service reported it could not initialize.
    #[error("{service} initialization failed")]
    Unavailable { service: &'static str },

    /// A service faulted while initializing.
    #[error(transparent)]
    Faulted(ServiceError),
}

impl StartupError {
    /// Name of the service that caused the failure.
    pub fn service(&self) -> &'static str {
        match self {
            StartupError::Unavailable { service } => *service,
            StartupError::Faulted(e) => e.service,
        }
    }
}

impl Orchestrator {
    /// Initialize all services.
    ///
    /// On success every service is usable. On failure every service that did
    /// initialize has been closed before the error is returned.
    pub async fn startup(&self) -> Result<(), StartupError> {
        tracing::debug!(services = ?self.service_names(), "Starting services");

        let outcomes: Vec<InitOutcome> =
            join_all(self.startup_order.iter().map(|s| initialize_one(s.as_ref()))).await;

        let Some(index) = outcomes.iter().position(|o| !o.is_ready()) else {
            tracing::debug!("Startup complete");
            return Ok(());
        };

        let to_close: Vec<Arc<dyn ManagedService>> = self
            .startup_order
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_ready())
            .map(|(service, _)| Arc::clone(service))
            .collect();

        let service = self.startup_order[index].name();
        let error = match outcomes.into_iter().nth(index) {
            Some(InitOutcome::Faulted(e)) => {
                tracing::error!(service, error = %e.source, "Service initialization failed");
                StartupError::Faulted(e)
            }
            _ => {
                tracing::error!(service, "Service initialization failed");
                StartupError::Unavailable { service }
            }
        };

        rollback(&to_close).await;
        Err(error)
    }
}

async fn initialize_one(service: &dyn ManagedService) -> InitOutcome {
    let started = Instant::now();
    let outcome = InitOutcome::from(service.initialize().await);
    metrics::record_service_init(service.name(), outcome.label(), started);
    tracing::debug!(
        service = service.name(),
        outcome = outcome.label(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Service initialize finished"
    );
    outcome
}

/// Best-effort close of the services that came up before a sibling failed.
async fn rollback(services: &[Arc<dyn ManagedService>]) {
    if services.is_empty() {
        return;
    }
    let results = join_all(services.iter().map(|s| s.close())).await;
    for (service, result) in services.iter().zip(results) {
        match result {
            Ok(()) => {
                metrics::record_service_close(service.name(), "ok");
                tracing::info!(service = service.name(), "Closed after failed startup");
            }
            Err(e) => {
                metrics::record_service_close(service.name(), "faulted");
                tracing::warn!(service = service.name(), error = %e.source, "Cleanup after failed startup failed");
            }
        }
    }
}
