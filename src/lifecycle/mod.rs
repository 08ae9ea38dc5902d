//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     initialize() on every service concurrently
//!     → collect every outcome (Ready | Unavailable | Faulted)
//!     → first failure in startup order: close the services that came up, return error
//!     → otherwise: begin serving
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → close() every service concurrently
//!     → failures logged as warnings, never returned
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Services are joined with "wait for all"; a fault never cancels a sibling
//! - Rollback is decided per outcome, never by position
//! - No timeout at this level: each service owns its own deadlines

use std::sync::Arc;

pub mod service;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use service::{BoxError, ManagedService, Readiness, ServiceError};
pub use shutdown::{Shutdown, ShutdownReport};
pub use startup::{InitOutcome, StartupError};

/// Drives startup and shutdown of a fixed set of backing services.
///
/// Startup and shutdown orders are independent; shutdown order only affects
/// the order of log lines and report entries.
#[derive(Clone)]
pub struct Orchestrator {
    startup_order: Vec<Arc<dyn ManagedService>>,
    shutdown_order: Vec<Arc<dyn ManagedService>>,
}

impl Orchestrator {
    pub fn new(
        startup_order: Vec<Arc<dyn ManagedService>>,
        shutdown_order: Vec<Arc<dyn ManagedService>>,
    ) -> Self {
        Self {
            startup_order,
            shutdown_order,
        }
    }

    /// Names of the managed services in startup order.
    pub fn service_names(&self) -> Vec<&'static str> {
        self.startup_order.iter().map(|s| s.name()).collect()
    }
}
