//! Tracing subscriber setup for binaries embedding the access layer.

use tessera_core::{AccessResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives (e.g. "tessera_client=debug,info")
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "tessera_client=info,tessera_cache=info,warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Create TelemetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_LOG`: filter directives (default: "tessera_client=info,tessera_cache=info,warn")
    /// - `TESSERA_LOG_FORMAT`: "pretty" or "json" (default: pretty)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            filter: std::env::var("TESSERA_LOG").unwrap_or(defaults.filter),
            format: match std::env::var("TESSERA_LOG_FORMAT")
                .map(|s| s.to_lowercase())
                .as_deref()
            {
                Ok("json") => LogFormat::Json,
                _ => defaults.format,
            },
        }
    }
}

/// Install a global `tracing` subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> AccessResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "TESSERA_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| {
        ConfigError::InvalidValue {
            field: "tracing subscriber".to_string(),
            value: format!("{:?}", config.format),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = TelemetryConfig {
            filter: "tessera_client=loud".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(TelemetryConfig::default().filter).is_ok());
    }
}
