//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config.toml (./, ~/.config/imbi/, /etc/imbi/)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (IMBI_*, NEO4J_*, CLICKHOUSE_*)
//!     → validation.rs (semantic checks)
//!     → ImbiConfig (validated, immutable)
//!     → handed to the composition root at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Environment variables always take precedence over file values
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_default_config, ConfigError};
pub use schema::ImbiConfig;
pub use schema::{
    AuthConfig, ClickhouseConfig, EmailConfig, LogFormat, Neo4jConfig, ObservabilityConfig,
    RateLimitConfig, ServerConfig,
};
