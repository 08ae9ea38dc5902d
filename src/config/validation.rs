//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check URLs and rate limit expressions parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ImbiConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ImbiConfig;
use crate::security::rate_limit::RateLimit;
use crate::services::email::is_plain_address;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `neo4j.url`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a fully loaded configuration.
pub fn validate_config(config: &ImbiConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::new("server.port", "must be non-zero"));
    }
    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }

    check_http_url("neo4j.url", &config.neo4j.url, &mut errors);
    if config.neo4j.database.trim().is_empty() {
        errors.push(ValidationError::new("neo4j.database", "must not be empty"));
    }
    if config.neo4j.timeout_secs == 0 {
        errors.push(ValidationError::new("neo4j.timeout_secs", "must be greater than 0"));
    }

    check_http_url("clickhouse.url", &config.clickhouse.url, &mut errors);
    if config.clickhouse.connect_attempts == 0 {
        errors.push(ValidationError::new("clickhouse.connect_attempts", "must be greater than 0"));
    }
    if config.clickhouse.timeout_secs == 0 {
        errors.push(ValidationError::new("clickhouse.timeout_secs", "must be greater than 0"));
    }
    if config.clickhouse.max_retry_delay_ms < config.clickhouse.initial_retry_delay_ms {
        errors.push(ValidationError::new(
            "clickhouse.max_retry_delay_ms",
            "must not be smaller than initial_retry_delay_ms",
        ));
    }

    if config.email.enabled {
        if config.email.smtp_host.trim().is_empty() {
            errors.push(ValidationError::new("email.smtp_host", "must not be empty"));
        }
        if config.email.smtp_port == 0 {
            errors.push(ValidationError::new("email.smtp_port", "must be non-zero"));
        }
        if config.email.smtp_timeout_secs == 0 {
            errors.push(ValidationError::new("email.smtp_timeout_secs", "must be greater than 0"));
        }
        if !is_plain_address(&config.email.from_email) {
            errors.push(ValidationError::new(
                "email.from_email",
                format!("'{}' is not an email address", config.email.from_email),
            ));
        }
        if let Some(reply_to) = &config.email.reply_to {
            if !is_plain_address(reply_to) {
                errors.push(ValidationError::new(
                    "email.reply_to",
                    format!("'{}' is not an email address", reply_to),
                ));
            }
        }
    }

    if config.rate_limit.enabled {
        if let Err(e) = config.rate_limit.default_limit.parse::<RateLimit>() {
            errors.push(ValidationError::new("rate_limit.default_limit", e.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}', expected http or https", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {}", e))),
    }
}
