//! Contract between the orchestrator and a backing service.

use async_trait::async_trait;
use thiserror::Error;

/// Boxed error carried by a service fault.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Non-fault result of [`ManagedService::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Initialized and usable.
    Ready,
    /// Could not initialize, reported cleanly rather than as a fault.
    Unavailable,
}

/// A fault raised by a backing service during `initialize` or `close`.
#[derive(Debug, Error)]
#[error("{service}: {source}")]
pub struct ServiceError {
    /// Name of the service that faulted.
    pub service: &'static str,
    #[source]
    pub source: BoxError,
}

impl ServiceError {
    pub fn new(service: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            service,
            source: source.into(),
        }
    }
}

/// A backing service whose lifecycle is driven by the orchestrator.
///
/// `close` must be idempotent and safe to call on a service that was never
/// initialized.
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Name used in logs, metrics and errors.
    fn name(&self) -> &'static str;

    async fn initialize(&self) -> Result<Readiness, ServiceError>;

    async fn close(&self) -> Result<(), ServiceError>;
}
