//! Report server configuration from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::window::ReportCalendar;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Demo,
    File,
    Api,
}

impl SourceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceMode::Demo => "demo",
            SourceMode::File => "file",
            SourceMode::Api => "api",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub source: SourceMode,
    pub file_path: Option<PathBuf>,
    pub calendar: ReportCalendar,
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid REPORTS_ADDR '{0}'")]
    InvalidAddr(String),
    #[error("invalid REPORTS_TZ '{0}'")]
    InvalidTimeZone(String),
    #[error("REPORTS_SOURCE=file requires REPORTS_FILE")]
    MissingFilePath,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            source: SourceMode::Demo,
            file_path: None,
            calendar: ReportCalendar::utc(),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

/// Unknown source modes and refresh intervals fall back to defaults; an
/// unparseable address or zone is an error.
pub fn server_config_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    let addr = env::var("REPORTS_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    config.addr = addr
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddr(addr.clone()))?;

    if let Ok(tz) = env::var("REPORTS_TZ") {
        if !tz.trim().is_empty() {
            config.calendar =
                ReportCalendar::parse(&tz).map_err(|_| ConfigError::InvalidTimeZone(tz.clone()))?;
        }
    }

    if let Some(mode) = env::var("REPORTS_SOURCE")
        .ok()
        .as_deref()
        .and_then(parse_source_mode)
    {
        config.source = mode;
    }

    config.file_path = env::var("REPORTS_FILE")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from);
    if config.source == SourceMode::File && config.file_path.is_none() {
        return Err(ConfigError::MissingFilePath);
    }

    if let Some(refresh) = env::var("REPORTS_REFRESH_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
    {
        config.refresh_interval_ms = refresh;
    }

    Ok(config)
}

pub fn parse_source_mode(raw: &str) -> Option<SourceMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "demo" => Some(SourceMode::Demo),
        "file" => Some(SourceMode::File),
        "api" | "live" => Some(SourceMode::Api),
        _ => None,
    }
}
