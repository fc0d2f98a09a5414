//! Process-wide tracing setup.

use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Per-query sqlx logs are noisy at `info`; keep them at `warn` unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &str = "sqlx=warn,hyper=warn";

#[derive(Debug)]
pub enum TelemetryError {
    EnvFilter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::EnvFilter { value, .. } => {
                write!(f, "invalid APP_LOG_LEVEL '{}': unable to build EnvFilter", value)
            }
            TelemetryError::Subscriber(err) => write!(f, "telemetry error: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::EnvFilter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Filter built from `APP_LOG_LEVEL` when `RUST_LOG` is not set.
pub fn configured_filter(log_level: &str) -> Result<EnvFilter, TelemetryError> {
    let directives = format!("{},{}", log_level.trim(), QUIET_DEPENDENCIES);
    EnvFilter::try_new(&directives).map_err(|source| TelemetryError::EnvFilter {
        value: log_level.to_string(),
        source,
    })
}

pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => configured_filter(&config.log_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_accepts_level_names() {
        let filter = configured_filter("debug").expect("filter builds");
        assert!(filter.to_string().contains("sqlx=warn"));
    }

    #[test]
    fn configured_filter_rejects_garbage() {
        let err = configured_filter("info,gull_licensing=loud").expect_err("invalid directive");
        assert!(err.to_string().contains("APP_LOG_LEVEL"));
    }
}
