//! Logging setup and the report server's structured lifecycle events.

use std::env;
use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::window::TimeWindow;

const COMPONENT: &str = "report_server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `REPORTS_LOG_LEVEL`, `REPORTS_LOG_FORMAT` and `REPORTS_LOG_TARGET`.
pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|key| env::var(key).ok())
}

/// Unparseable values keep their defaults.
pub fn logging_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoggingConfig {
    let defaults = LoggingConfig::default();

    LoggingConfig {
        level: lookup("REPORTS_LOG_LEVEL")
            .map(|raw| raw.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or(defaults.level),
        format: lookup("REPORTS_LOG_FORMAT")
            .as_deref()
            .and_then(parse_log_format)
            .unwrap_or(defaults.format),
        include_target: lookup("REPORTS_LOG_TARGET")
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(logging: &LoggingConfig, server: &ServerConfig) {
    info!(
        component = COMPONENT,
        event = "app.start",
        log_level = %logging.level,
        log_format = ?logging.format,
        source = server.source.as_str(),
        time_zone = %server.calendar.tz().name()
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = COMPONENT,
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/reports"
    );
}

pub fn log_source_selected(source: &str, detail: Option<&str>, refresh_interval_ms: Option<u64>) {
    match (detail, refresh_interval_ms) {
        (Some(detail), Some(refresh_interval_ms)) => info!(
            component = COMPONENT,
            event = "source.selected",
            source,
            detail,
            refresh_interval_ms
        ),
        (Some(detail), None) => info!(
            component = COMPONENT,
            event = "source.selected",
            source,
            detail
        ),
        (None, Some(refresh_interval_ms)) => info!(
            component = COMPONENT,
            event = "source.selected",
            source,
            refresh_interval_ms
        ),
        (None, None) => info!(component = COMPONENT, event = "source.selected", source),
    }
}

pub fn log_report_request(
    route: &str,
    window: Option<TimeWindow>,
    records: usize,
    rejected: usize,
) {
    match window {
        Some(window) => info!(
            component = COMPONENT,
            event = "http.report.request",
            route,
            window = window.as_str(),
            records,
            rejected
        ),
        None => info!(
            component = COMPONENT,
            event = "http.report.request",
            route,
            records,
            rejected
        ),
    }
}

pub fn log_report_rejected(route: &str, error: &dyn fmt::Display) {
    warn!(
        component = COMPONENT,
        event = "http.report.invalid_query",
        route,
        error = %error
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> LoggingConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        logging_config_from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(from_pairs(&[]), LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = from_pairs(&[
            ("REPORTS_LOG_LEVEL", "exchange_reports=debug"),
            ("REPORTS_LOG_FORMAT", "JSON"),
            ("REPORTS_LOG_TARGET", "off"),
        ]);

        assert_eq!(cfg.level, "exchange_reports=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn compact_format_is_recognized() {
        let cfg = from_pairs(&[("REPORTS_LOG_FORMAT", "compact")]);
        assert_eq!(cfg.format, LogFormat::Compact);
    }

    #[test]
    fn blank_or_invalid_values_keep_defaults() {
        let cfg = from_pairs(&[
            ("REPORTS_LOG_LEVEL", "   "),
            ("REPORTS_LOG_FORMAT", "yaml"),
            ("REPORTS_LOG_TARGET", "maybe"),
        ]);

        assert_eq!(cfg, LoggingConfig::default());
    }
}
