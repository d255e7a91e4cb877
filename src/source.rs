//! Record sources feeding the reporting routes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ApiError, ExchangeApiClient};
use crate::records::{
    decode_records, parse_records_payload, FinancialRecord, PayloadError, RawRecord, RecordBatch,
};

const DEMO_RECORD_COUNT: usize = 60;
const DEMO_CURRENCIES: [&str; 4] = ["USDT", "BTC", "ETH", "NGN"];
const DEMO_TRANSACTION_TYPES: [&str; 3] = ["buy", "sell", "swap"];
const STOP_POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub batch: RecordBatch,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub trait RecordSource: Send + Sync + 'static {
    fn snapshot(&self) -> RecordSnapshot;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read records from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid records file {path}: {source}")]
    Payload {
        path: PathBuf,
        #[source]
        source: PayloadError,
    },
}

#[derive(Clone)]
pub struct InMemoryRecordSource {
    inner: Arc<RwLock<RecordSnapshot>>,
}

impl InMemoryRecordSource {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RecordSnapshot {
                batch,
                fetched_at: Some(Utc::now()),
                last_error: None,
            })),
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_batch(Utc::now()))
    }

    pub fn replace_batch(&self, batch: RecordBatch) {
        let mut guard = self
            .inner
            .write()
            .expect("in-memory snapshot lock should not be poisoned");
        guard.batch = batch;
        guard.fetched_at = Some(Utc::now());
    }
}

impl RecordSource for InMemoryRecordSource {
    fn snapshot(&self) -> RecordSnapshot {
        self.inner
            .read()
            .expect("in-memory snapshot lock should not be poisoned")
            .clone()
    }
}

/// Re-reads a JSON export on every snapshot, so edits show up without a
/// restart.
#[derive(Debug, Clone)]
pub struct JsonFileRecordSource {
    path: PathBuf,
}

impl JsonFileRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RecordBatch, SourceError> {
        let bytes = std::fs::read(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let raw = parse_records_payload(&bytes).map_err(|source| SourceError::Payload {
            path: self.path.clone(),
            source,
        })?;
        Ok(decode_records(&raw))
    }
}

impl RecordSource for JsonFileRecordSource {
    fn snapshot(&self) -> RecordSnapshot {
        match self.load() {
            Ok(batch) => RecordSnapshot {
                batch,
                fetched_at: Some(Utc::now()),
                last_error: None,
            },
            Err(err) => {
                warn!(
                    component = "record_source",
                    event = "source.file.error",
                    path = %self.path.display(),
                    error = %err
                );
                RecordSnapshot {
                    batch: RecordBatch::default(),
                    fetched_at: None,
                    last_error: Some(err.to_string()),
                }
            }
        }
    }
}

pub trait RecordFetcher: Send + 'static {
    fn fetch(&self) -> Result<Vec<RawRecord>, ApiError>;
}

impl RecordFetcher for ExchangeApiClient {
    fn fetch(&self) -> Result<Vec<RawRecord>, ApiError> {
        self.fetch_profits()
    }
}

impl<F> RecordFetcher for F
where
    F: Fn() -> Result<Vec<RawRecord>, ApiError> + Send + 'static,
{
    fn fetch(&self) -> Result<Vec<RawRecord>, ApiError> {
        self()
    }
}

/// Refreshes its snapshot from a fetcher on a background thread. A failed
/// refresh keeps the last good batch and records the error.
pub struct PollingRecordSource {
    inner: Arc<RwLock<RecordSnapshot>>,
    stop: Arc<AtomicBool>,
}

impl PollingRecordSource {
    pub fn spawn<F: RecordFetcher>(fetcher: F, refresh_interval_ms: u64) -> Self {
        let inner = Arc::new(RwLock::new(RecordSnapshot::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(refresh_interval_ms.max(1));

        let thread_inner = Arc::clone(&inner);
        let thread_stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                refresh_snapshot(&fetcher, &thread_inner);

                let deadline = Instant::now() + interval;
                while !thread_stop.load(Ordering::Relaxed) && Instant::now() < deadline {
                    std::thread::sleep(STOP_POLL_STEP.min(interval));
                }
            }
        });

        Self { inner, stop }
    }

    /// Blocks until the first refresh finished (successfully or not).
    pub fn wait_for_first_refresh(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let done = {
                let guard = self
                    .inner
                    .read()
                    .expect("polling snapshot lock should not be poisoned");
                guard.fetched_at.is_some() || guard.last_error.is_some()
            };
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl RecordSource for PollingRecordSource {
    fn snapshot(&self) -> RecordSnapshot {
        self.inner
            .read()
            .expect("polling snapshot lock should not be poisoned")
            .clone()
    }
}

impl Drop for PollingRecordSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn refresh_snapshot(fetcher: &dyn RecordFetcher, target: &RwLock<RecordSnapshot>) {
    match fetcher.fetch() {
        Ok(raw) => {
            let batch = decode_records(&raw);
            info!(
                component = "record_source",
                event = "source.refresh.ok",
                records = batch.records.len(),
                rejected = batch.rejected.len()
            );
            let mut guard = target
                .write()
                .expect("polling snapshot lock should not be poisoned");
            guard.batch = batch;
            guard.fetched_at = Some(Utc::now());
            guard.last_error = None;
        }
        Err(err) => {
            warn!(
                component = "record_source",
                event = "source.refresh.error",
                error = %err
            );
            let mut guard = target
                .write()
                .expect("polling snapshot lock should not be poisoned");
            guard.last_error = Some(err.to_string());
        }
    }
}

/// Deterministic sample spread over roughly fourteen months before `now`.
pub fn demo_batch(now: DateTime<Utc>) -> RecordBatch {
    let records = (0..DEMO_RECORD_COUNT)
        .map(|i| {
            let step = i as i64;
            let fee = 50.0 + ((i * 37) % 200) as f64;
            let naira = fee * 40.0;
            FinancialRecord::new(now - TimeDelta::hours(step * 173 + 2), naira, fee)
                .with_id(format!("demo-{i:03}"))
                .with_reference(format!("TRX-{:06}", 100_000 + i * 7))
                .with_category(DEMO_CURRENCIES[i % DEMO_CURRENCIES.len()])
                .with_transaction_type(DEMO_TRANSACTION_TYPES[i % DEMO_TRANSACTION_TYPES.len()])
                .with_crypto(naira / 1_600.0, fee / 1_600.0)
        })
        .collect();

    RecordBatch::from_records(records)
}
