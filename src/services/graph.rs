//! Graph store client (Neo4j HTTP transactional endpoint).
//!
//! # Responsibilities
//! - Hold the HTTP client used for Cypher statements
//! - Create schema constraints and indexes on initialize
//! - Run statements and map result rows to JSON objects

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Neo4jConfig;
use crate::lifecycle::{ManagedService, Readiness, ServiceError};

pub const SERVICE_NAME: &str = "neo4j";

/// Constraints and indexes created on initialize.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT blueprint_pkey IF NOT EXISTS FOR (n:Blueprint) REQUIRE (n.name, n.type) IS UNIQUE",
    "CREATE CONSTRAINT user_username_unique IF NOT EXISTS FOR (n:User) REQUIRE n.username IS UNIQUE",
    "CREATE CONSTRAINT user_email_unique IF NOT EXISTS FOR (n:User) REQUIRE n.email IS UNIQUE",
    "CREATE INDEX user_active IF NOT EXISTS FOR (n:User) ON (n.is_active)",
    "CREATE CONSTRAINT group_slug_unique IF NOT EXISTS FOR (n:Group) REQUIRE n.slug IS UNIQUE",
    "CREATE CONSTRAINT role_slug_unique IF NOT EXISTS FOR (n:Role) REQUIRE n.slug IS UNIQUE",
    "CREATE INDEX role_priority IF NOT EXISTS FOR (n:Role) ON (n.priority)",
    "CREATE CONSTRAINT permission_name_unique IF NOT EXISTS FOR (n:Permission) REQUIRE n.name IS UNIQUE",
    "CREATE INDEX permission_resource IF NOT EXISTS FOR (n:Permission) ON (n.resource_type)",
    "CREATE CONSTRAINT token_jti_unique IF NOT EXISTS FOR (n:TokenMetadata) REQUIRE n.jti IS UNIQUE",
    "CREATE CONSTRAINT oauth_identity_provider_user_unique IF NOT EXISTS FOR (n:OAuthIdentity) REQUIRE (n.provider, n.provider_user_id) IS UNIQUE",
    "CREATE INDEX oauth_identity_email IF NOT EXISTS FOR (n:OAuthIdentity) ON (n.email)",
    "CREATE CONSTRAINT session_id_unique IF NOT EXISTS FOR (n:Session) REQUIRE n.session_id IS UNIQUE",
    "CREATE INDEX session_expires IF NOT EXISTS FOR (n:Session) ON (n.expires_at)",
    "CREATE CONSTRAINT api_key_id_unique IF NOT EXISTS FOR (n:APIKey) REQUIRE n.key_id IS UNIQUE",
    "CREATE INDEX api_key_revoked IF NOT EXISTS FOR (n:APIKey) ON (n.revoked)",
];

/// Errors returned by the graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph store is not connected")]
    NotConnected,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected a statement.
    #[error("{code}: {message}")]
    Cypher { code: String, message: String },
}

impl GraphError {
    /// Schema rule conflicts are expected when constraints already exist.
    pub fn is_schema_conflict(&self) -> bool {
        matches!(self, GraphError::Cypher { code, .. } if code.starts_with("Neo.ClientError.Schema."))
    }
}

/// One result row keyed by column name.
pub type Record = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl TxResult {
    fn into_records(self) -> Vec<Record> {
        let columns = self.columns;
        self.data
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row.row).collect())
            .collect()
    }
}

/// Neo4j client driven by the lifecycle orchestrator.
pub struct GraphStore {
    config: Neo4jConfig,
    client: RwLock<Option<reqwest::Client>>,
}

impl GraphStore {
    pub fn new(config: Neo4jConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.client.read().await.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.url.trim_end_matches('/'),
            self.config.database
        )
    }

    /// Run a single Cypher statement in its own transaction.
    pub async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Record>, GraphError> {
        let client = self.client.read().await.clone().ok_or(GraphError::NotConnected)?;

        tracing::debug!(statement, "Neo4j QUERY");
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let mut request = client.post(self.endpoint()).json(&body);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_deref());
        }

        let response: TxResponse = request.send().await?.error_for_status()?.json().await?;
        if let Some(error) = response.errors.into_iter().next() {
            return Err(GraphError::Cypher {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response
            .results
            .into_iter()
            .next()
            .map(TxResult::into_records)
            .unwrap_or_default())
    }

    async fn connect(&self) -> Result<(), GraphError> {
        let mut guard = self.client.write().await;
        if guard.is_none() {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(self.config.timeout_secs))
                .user_agent(concat!("imbi/", env!("CARGO_PKG_VERSION")))
                .build()?;
            *guard = Some(client);
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<(), GraphError> {
        for statement in SCHEMA_STATEMENTS {
            match self.run(statement, json!({})).await {
                Ok(_) => {}
                Err(e) if e.is_schema_conflict() => {
                    tracing::debug!(error = %e, "Error creating index");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedService for GraphStore {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn initialize(&self) -> Result<Readiness, ServiceError> {
        tracing::debug!(url = %self.config.url, database = %self.config.database, "Initializing Neo4j");
        self.connect().await.map_err(|e| ServiceError::new(SERVICE_NAME, e))?;

        if let Err(e) = self.create_schema().await {
            // Leave nothing half-open behind a fault.
            self.client.write().await.take();
            return Err(ServiceError::new(SERVICE_NAME, e));
        }
        Ok(Readiness::Ready)
    }

    async fn close(&self) -> Result<(), ServiceError> {
        tracing::debug!("Closing Neo4j");
        self.client.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_map_to_columns() {
        let raw = r#"{
            "results": [{
                "columns": ["name", "is_new"],
                "data": [{"row": ["user:read", true], "meta": [null, null]}]
            }],
            "errors": []
        }"#;
        let response: TxResponse = serde_json::from_str(raw).unwrap();
        let records = response.results.into_iter().next().unwrap().into_records();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "user:read");
        assert_eq!(records[0]["is_new"], true);
    }

    #[test]
    fn test_schema_conflict_detection() {
        let conflict = GraphError::Cypher {
            code: "Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists".to_string(),
            message: "exists".to_string(),
        };
        let syntax = GraphError::Cypher {
            code: "Neo.ClientError.Statement.SyntaxError".to_string(),
            message: "bad".to_string(),
        };
        assert!(conflict.is_schema_conflict());
        assert!(!syntax.is_schema_conflict());
        assert!(!GraphError::NotConnected.is_schema_conflict());
    }

    #[tokio::test]
    async fn test_run_before_initialize_fails() {
        let store = GraphStore::new(Neo4jConfig::default());
        assert!(matches!(
            store.run("RETURN 1", json!({})).await,
            Err(GraphError::NotConnected)
        ));
        assert!(!store.is_ready().await);
        assert!(store.close().await.is_ok());
    }
}
