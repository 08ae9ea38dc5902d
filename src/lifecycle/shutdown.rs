//! Shutdown coordination.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::watch;

use crate::lifecycle::service::ServiceError;
use crate::lifecycle::Orchestrator;
use crate::observability::metrics;

/// Latching stop request shared by the signal listener and the HTTP server.
///
/// A trigger that happens before anyone waits is still observed.
#[derive(Clone)]
pub struct Shutdown {
    requested: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
        }
    }

    /// Request shutdown; returns `false` when it was already requested.
    pub fn trigger(&self) -> bool {
        !self.requested.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.requested.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.requested.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Services that failed to close during shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub failures: Vec<ServiceError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_services(&self) -> Vec<&'static str> {
        self.failures.iter().map(|e| e.service).collect()
    }
}

impl Orchestrator {
    /// Close every service. Never fails; each failed close is logged as a warning.
    ///
    /// Safe to call when `startup` never ran or already rolled back.
    pub async fn shutdown(&self) -> ShutdownReport {
        let results = join_all(self.shutdown_order.iter().map(|s| s.close())).await;

        let mut report = ShutdownReport::default();
        for (service, result) in self.shutdown_order.iter().zip(results) {
            match result {
                Ok(()) => metrics::record_service_close(service.name(), "ok"),
                Err(e) => {
                    metrics::record_service_close(service.name(), "faulted");
                    tracing::warn!(service = service.name(), error = %e.source, "Service shutdown failed");
                    report.failures.push(e);
                }
            }
        }

        if report.is_clean() {
            tracing::debug!("Clean shutdown complete");
        }
        report
    }
}
