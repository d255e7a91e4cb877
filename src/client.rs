//! Blocking client for the exchange admin API's record listings.
//!
//! The auth token travels inside [`ApiClientConfig`]; nothing is read from
//! process-global state at request time.

use std::env;

use thiserror::Error;
use tracing::{debug, warn};

use crate::records::{parse_records_payload, PayloadError, RawRecord};

pub const PROFITS_PATH: &str = "profits/all";
pub const TRANSACTIONS_PATH: &str = "transactions/all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".to_string(),
            auth_token: None,
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP client build error: {0}")]
    ClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Request { url: String, message: String },
    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("invalid response from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: PayloadError,
    },
}

impl ApiError {
    /// Transport failures and 5xx responses are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Request { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::ClientBuild(_) | ApiError::Payload { .. } => false,
        }
    }
}

pub fn api_client_config_from_env() -> ApiClientConfig {
    let mut config = ApiClientConfig::default();

    if let Ok(base_url) = env::var("REPORTS_API_BASE_URL") {
        let trimmed = base_url.trim();
        if !trimmed.is_empty() {
            config.base_url = trimmed.to_string();
        }
    }

    if let Ok(token) = env::var("REPORTS_API_TOKEN") {
        let trimmed = token.trim();
        if !trimmed.is_empty() {
            config.auth_token = Some(trimmed.to_string());
        }
    }

    if let Some(timeout_ms) = env::var("REPORTS_API_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
    {
        config.timeout_ms = timeout_ms;
    }

    if let Some(max_retries) = env::var("REPORTS_API_MAX_RETRIES")
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
    {
        config.max_retries = max_retries;
    }

    config
}

pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) trait HttpTransport {
    fn get_bytes(&self, url: &str, auth_token: Option<&str>) -> Result<Vec<u8>, ApiError>;
}

struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    fn new(timeout_ms: u64) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ApiError::ClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestBlockingTransport {
    fn get_bytes(&self, url: &str, auth_token: Option<&str>) -> Result<Vec<u8>, ApiError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().map_err(|err| ApiError::Request {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ApiError::Request {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

/// Build and drop this outside of an async runtime: the blocking reqwest
/// client owns its own runtime.
pub struct ExchangeApiClient {
    config: ApiClientConfig,
    transport: ReqwestBlockingTransport,
}

impl ExchangeApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let transport = ReqwestBlockingTransport::new(config.timeout_ms)?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    pub fn fetch_profits(&self) -> Result<Vec<RawRecord>, ApiError> {
        fetch_records_with(&self.transport, &self.config, PROFITS_PATH)
    }

    pub fn fetch_transactions(&self) -> Result<Vec<RawRecord>, ApiError> {
        fetch_records_with(&self.transport, &self.config, TRANSACTIONS_PATH)
    }
}

pub(crate) fn fetch_records_with(
    transport: &dyn HttpTransport,
    config: &ApiClientConfig,
    path: &str,
) -> Result<Vec<RawRecord>, ApiError> {
    let url = endpoint_url(&config.base_url, path);
    let bytes = retry(config, &url, || {
        transport.get_bytes(&url, config.auth_token.as_deref())
    })?;

    let records = parse_records_payload(&bytes).map_err(|source| ApiError::Payload {
        url: url.clone(),
        source,
    })?;

    debug!(
        component = "api_client",
        event = "api.fetch.ok",
        url = %url,
        records = records.len()
    );
    Ok(records)
}

fn retry<T>(
    config: &ApiClientConfig,
    url: &str,
    mut f: impl FnMut() -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.max_retries || !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let backoff = backoff_duration(config.retry_backoff_ms, attempt);
                warn!(
                    component = "api_client",
                    event = "api.fetch.retry",
                    url,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err
                );
                std::thread::sleep(backoff);
            }
        }
    }
}

fn backoff_duration(base_ms: u64, attempt: u32) -> std::time::Duration {
    let shift = attempt.saturating_sub(1).min(10);
    std::time::Duration::from_millis(base_ms.saturating_mul(1_u64 << shift))
}
