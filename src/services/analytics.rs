//! Analytics store client (ClickHouse HTTP interface).
//!
//! # Responsibilities
//! - Connect with exponential backoff, reporting a clean failure when the
//!   server never answers
//! - Apply the embedded schemata DDL after every connect
//! - Run queries and inserts using the `JSONEachRow` format
//!
//! # Design Decisions
//! - An unreachable server is `Readiness::Unavailable`, not a fault: the
//!   retry budget was spent and there is nothing exceptional to report
//! - Failing schemata statements are logged and skipped
//! - Queries issued before initialize connect lazily

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::config::ClickhouseConfig;
use crate::lifecycle::{ManagedService, Readiness, ServiceError};
use crate::resilience::backoff::Backoff;

pub const SERVICE_NAME: &str = "clickhouse";

const DEFAULT_DATABASE: &str = "internal";
const SCHEMATA: &str = include_str!("schemata.toml");

/// Errors returned by the analytics store.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics store is not connected")]
    NotConnected,

    #[error("invalid ClickHouse URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("ClickHouse error ({status}): {message}")]
    Database { status: u16, message: String },

    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("insert requires at least one row")]
    EmptyInsert,

    #[error("invalid table name '{0}'")]
    InvalidTable(String),
}

/// A DDL statement from the embedded schemata file.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemataQuery {
    pub name: String,
    pub query: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SchemataFile {
    #[serde(default)]
    query: Vec<SchemataQuery>,
}

/// Parse schemata entries in file order.
pub fn parse_schemata(content: &str) -> Result<Vec<SchemataQuery>, toml::de::Error> {
    toml::from_str::<SchemataFile>(content).map(|f| f.query)
}

/// Where and as whom to connect, derived from the configured URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub endpoint: Url,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionTarget {
    pub fn from_url(raw: &str) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(raw)?;

        let database = url.path().trim_matches('/').to_string();
        let database = if database.is_empty() {
            DEFAULT_DATABASE.to_string()
        } else {
            database
        };

        let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
        let user = Some(url.username()).filter(|u| !u.is_empty()).map(decode);
        let password = url.password().map(decode);

        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_path("/");
        url.set_query(None);

        Ok(Self {
            endpoint: url,
            database,
            user,
            password,
        })
    }
}

#[derive(Clone)]
struct Connection {
    client: reqwest::Client,
    target: ConnectionTarget,
}

impl Connection {
    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(user) = &self.target.user {
            builder = builder.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.target.password {
            builder = builder.header("X-ClickHouse-Key", password);
        }
        builder
    }

    async fn ping(&self) -> Result<(), AnalyticsError> {
        let url = self.target.endpoint.join("ping")?;
        self.request(self.client.get(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post(&self, body: String, parameters: &[(&str, &str)]) -> Result<String, AnalyticsError> {
        let mut query: Vec<(String, &str)> = vec![("database".to_string(), self.target.database.as_str())];
        query.extend(parameters.iter().map(|(k, v)| (format!("param_{}", k), *v)));

        let request = self
            .client
            .post(self.target.endpoint.clone())
            .query(&query)
            .body(body);
        let response = self.request(request).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), error = %text.trim(), "ClickHouse request failed");
            return Err(AnalyticsError::Database {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }
        Ok(text)
    }
}

/// ClickHouse client driven by the lifecycle orchestrator.
pub struct AnalyticsStore {
    config: ClickhouseConfig,
    connection: Mutex<Option<Connection>>,
}

impl AnalyticsStore {
    pub fn new(config: ClickhouseConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Connect (if needed) and apply the schemata.
    ///
    /// Returns `Ok(false)` when every connection attempt failed. The lock is
    /// held only to install a finished connection.
    pub async fn connect(&self) -> Result<bool, AnalyticsError> {
        if self.is_ready().await {
            return Ok(true);
        }

        tracing::debug!("Starting ClickHouse");
        let Some(connection) = self.open().await? else {
            return Ok(false);
        };
        self.apply_schemata(&connection).await;

        self.connection.lock().await.get_or_insert(connection);
        Ok(true)
    }

    /// Run a `SELECT`, returning one JSON object per row.
    ///
    /// `parameters` bind `{name:Type}` placeholders in the statement.
    pub async fn query(
        &self,
        sql: &str,
        parameters: &[(&str, &str)],
    ) -> Result<Vec<Map<String, Value>>, AnalyticsError> {
        tracing::debug!(sql, "ClickHouse QUERY");
        let statement = format!("{} FORMAT JSONEachRow", sql.trim().trim_end_matches(';'));
        let body = self.post(statement, parameters).await?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AnalyticsError::from))
            .collect()
    }

    /// Run a statement that returns no rows (DDL, mutations).
    pub async fn execute(&self, sql: &str) -> Result<(), AnalyticsError> {
        self.post(sql.to_string(), &[]).await.map(|_| ())
    }

    /// Insert rows into `table`; returns the number of rows sent.
    pub async fn insert<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<usize, AnalyticsError> {
        if rows.is_empty() {
            return Err(AnalyticsError::EmptyInsert);
        }
        if table.is_empty()
            || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(AnalyticsError::InvalidTable(table.to_string()));
        }

        let mut body = format!("INSERT INTO {} FORMAT JSONEachRow\n", table);
        for row in rows {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }

        tracing::debug!(table, rows = rows.len(), "ClickHouse INSERT");
        self.post(body, &[]).await?;
        Ok(rows.len())
    }

    async fn connection(&self) -> Result<Connection, AnalyticsError> {
        if let Some(connection) = self.connection.lock().await.clone() {
            return Ok(connection);
        }
        if !self.connect().await? {
            return Err(AnalyticsError::NotConnected);
        }
        self.connection.lock().await.clone().ok_or(AnalyticsError::NotConnected)
    }

    async fn post(&self, body: String, parameters: &[(&str, &str)]) -> Result<String, AnalyticsError> {
        self.connection().await?.post(body, parameters).await
    }

    /// Open a connection, retrying with backoff; `None` when attempts are exhausted.
    async fn open(&self) -> Result<Option<Connection>, AnalyticsError> {
        let target = ConnectionTarget::from_url(&self.config.url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(concat!("imbi/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let connection = Connection { client, target };

        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.initial_retry_delay_ms),
            Duration::from_millis(self.config.max_retry_delay_ms),
        );
        let attempts = self.config.connect_attempts;

        for attempt in 1..=attempts {
            tracing::debug!(
                endpoint = %connection.target.endpoint,
                attempt,
                "Connecting to ClickHouse"
            );
            match connection.ping().await {
                Ok(()) => {
                    tracing::info!(
                        endpoint = %connection.target.endpoint,
                        database = %connection.target.database,
                        "Connected to ClickHouse"
                    );
                    return Ok(Some(connection));
                }
                Err(e) if attempt < attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to connect to ClickHouse, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "Failed to connect to ClickHouse, giving up");
                }
            }
        }
        Ok(None)
    }

    async fn apply_schemata(&self, connection: &Connection) {
        let queries = match parse_schemata(SCHEMATA) {
            Ok(queries) => queries,
            Err(e) => {
                tracing::error!(error = %e, "Invalid schemata file");
                return;
            }
        };
        let enabled: Vec<_> = queries.into_iter().filter(|q| q.enabled).collect();
        tracing::info!(count = enabled.len(), "Executing enabled schemata queries");

        for query in enabled {
            match connection.post(query.query.clone(), &[]).await {
                Ok(_) => tracing::debug!(name = %query.name, "Executed schemata query"),
                Err(e) => tracing::error!(name = %query.name, error = %e, "Failed to execute schemata query"),
            }
        }
    }
}

#[async_trait]
impl ManagedService for AnalyticsStore {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn initialize(&self) -> Result<Readiness, ServiceError> {
        match self.connect().await {
            Ok(true) => Ok(Readiness::Ready),
            Ok(false) => Ok(Readiness::Unavailable),
            Err(e) => Err(ServiceError::new(SERVICE_NAME, e)),
        }
    }

    async fn close(&self) -> Result<(), ServiceError> {
        if self.connection.lock().await.take().is_some() {
            tracing::debug!("Closed ClickHouse connection");
        }
        Ok(())
    }
}
