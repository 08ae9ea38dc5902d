//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Pick the log format and level from configuration
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Default filter directives for the given settings.
pub fn default_directives(config: &ObservabilityConfig, development: bool) -> String {
    if development {
        "imbi=debug,tower_http=debug".to_string()
    } else {
        format!("imbi={level},tower_http={level}", level = config.log_level)
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: &ObservabilityConfig, development: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config, development)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_forces_debug() {
        let config = ObservabilityConfig::default();
        assert_eq!(default_directives(&config, true), "imbi=debug,tower_http=debug");
    }

    #[test]
    fn test_configured_level_applies_outside_development() {
        let config = ObservabilityConfig {
            log_level: "warn".to_string(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(default_directives(&config, false), "imbi=warn,tower_http=warn");
    }
}
