//! Backing services and the composition root that owns them.
//!
//! # Data Flow
//! ```text
//! ImbiConfig
//!     → Services::from_config (one handle per backing service)
//!     → Services::orchestrator (startup/shutdown orders)
//!     → shared by Arc with the HTTP layer and the auth seeder
//!     → Services::send_email (SMTP send, then audit row in ClickHouse)
//! ```

use std::sync::Arc;

pub mod analytics;
pub mod email;
pub mod graph;

pub use analytics::{AnalyticsError, AnalyticsStore};
pub use email::{EmailAudit, EmailError, EmailMessage, EmailStatus, EmailTransport};
pub use graph::{GraphError, GraphStore};

use crate::config::ImbiConfig;
use crate::lifecycle::{ManagedService, Orchestrator};

/// Every backing service handle used by the application.
#[derive(Clone)]
pub struct Services {
    pub graph: Arc<GraphStore>,
    pub analytics: Arc<AnalyticsStore>,
    pub email: Arc<EmailTransport>,
}

impl Services {
    pub fn from_config(config: &ImbiConfig) -> Self {
        Self {
            graph: Arc::new(GraphStore::new(config.neo4j.clone())),
            analytics: Arc::new(AnalyticsStore::new(config.clickhouse.clone())),
            email: Arc::new(EmailTransport::new(config.email.clone())),
        }
    }

    /// Startup order: analytics, graph, email. Shutdown order: graph, analytics, email.
    pub fn orchestrator(&self) -> Orchestrator {
        let graph = Arc::clone(&self.graph) as Arc<dyn ManagedService>;
        let analytics = Arc::clone(&self.analytics) as Arc<dyn ManagedService>;
        let email = Arc::clone(&self.email) as Arc<dyn ManagedService>;

        Orchestrator::new(
            vec![Arc::clone(&analytics), Arc::clone(&graph), Arc::clone(&email)],
            vec![graph, analytics, email],
        )
    }

    /// Readiness of each service, in startup order.
    pub async fn readiness(&self) -> Vec<(&'static str, bool)> {
        vec![
            (analytics::SERVICE_NAME, self.analytics.is_ready().await),
            (graph::SERVICE_NAME, self.graph.is_ready().await),
            (email::SERVICE_NAME, self.email.is_ready()),
        ]
    }

    /// Send `message` and record the attempt in the email audit table.
    ///
    /// An audit row that cannot be written is logged and dropped.
    pub async fn send_email(&self, message: &EmailMessage) -> EmailAudit {
        let audit = self.email.send(message).await;
        if let Err(e) = self
            .analytics
            .insert(email::AUDIT_TABLE, std::slice::from_ref(&audit))
            .await
        {
            tracing::warn!(
                to = %audit.to_email,
                status = audit.status.as_str(),
                error = %e,
                "Failed to record email audit"
            );
        }
        audit
    }
}
