//! Tracing initialisation
//!
//! Installs a `tracing-subscriber` registry with an env filter and an optional
//! fmt layer. Embedders that already own a subscriber skip this entirely.

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME_DEFAULT: &str = "horde";
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to write formatted events to stdout
    pub stdout_enabled: bool,
    /// Include span open/close events
    pub span_events: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            stdout_enabled: true,
            span_events: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the fallback filter directive
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Emit span open/close events
    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Read `HORDE_SERVICE_NAME` and `RUST_LOG`
    pub fn from_env() -> Self {
        let service_name = std::env::var("HORDE_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        Self {
            service_name,
            log_level,
            ..Default::default()
        }
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = config.stdout_enabled.then(|| {
        let span_events = if config.span_events {
            tracing_subscriber::fmt::format::FmtSpan::NEW | tracing_subscriber::fmt::format::FmtSpan::CLOSE
        } else {
            tracing_subscriber::fmt::format::FmtSpan::NONE
        };
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(span_events)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            reason: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Flushes telemetry on drop
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    /// Service name the guard was created for
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        opentelemetry::global::shutdown_tracer_provider();
        tracing::debug!(service = %self.service_name, "Telemetry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "horde");
        assert_eq!(config.log_level, "info");
        assert!(config.stdout_enabled);
        assert!(!config.span_events);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("test-service")
            .with_log_level("horde_runtime=debug")
            .with_span_events()
            .without_stdout();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "horde_runtime=debug");
        assert!(config.span_events);
        assert!(!config.stdout_enabled);
    }

    #[test]
    fn test_init_telemetry_twice_fails() {
        let first = init_telemetry(TelemetryConfig::new("first").without_stdout());
        let second = init_telemetry(TelemetryConfig::new("second").without_stdout());
        // another test binary may already own the global subscriber
        assert!(first.is_err() || second.is_err());
    }
}
