//! Environment-driven logging for the `subs` binary
//!
//! - `SUBS_LOG_LEVEL` (fallback `RUST_LOG`, default `info`): an `EnvFilter` directive
//! - `SUBS_LOG_FORMAT`: `compact` (default) or `json`
//!
//! Logs go to stderr; stdout carries rendered configs.

use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGING_CONFIG: OnceLock<LoggingConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact format
    Compact,
    /// Machine-readable JSON lines
    Json,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("SUBS_LOG_LEVEL").ok(),
            std::env::var("RUST_LOG").ok(),
            std::env::var("SUBS_LOG_FORMAT").ok(),
        )
    }

    fn from_vars(level: Option<String>, rust_log: Option<String>, format: Option<String>) -> Self {
        let format = match format.as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        let level = level
            .or(rust_log)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        Self { format, level }
    }
}

/// Install the global subscriber. A second call is an error.
pub fn init_logging() -> Result<()> {
    let config = LoggingConfig::from_env();
    LOGGING_CONFIG
        .set(config.clone())
        .map_err(|_| anyhow::anyhow!("logging already initialized"))?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };
    tracing_subscriber::registry().with(layer).try_init()?;

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_precedence_and_format() {
        let c = LoggingConfig::from_vars(Some("debug".into()), Some("warn".into()), Some("JSON".into()));
        assert_eq!(c.level, "debug");
        assert_eq!(c.format, LogFormat::Json);

        let c = LoggingConfig::from_vars(None, Some("subs_transcode=trace".into()), None);
        assert_eq!(c.level, "subs_transcode=trace");
        assert_eq!(c.format, LogFormat::Compact);

        let c = LoggingConfig::from_vars(Some(" ".into()), None, Some("pretty".into()));
        assert_eq!(c.level, "info");
        assert_eq!(c.format, LogFormat::Compact);
    }
}
