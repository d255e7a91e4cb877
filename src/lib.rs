//! Reporting core for the exchange admin dashboard.
//!
//! - Period aggregation: windowed sums/counts and window-over-window change
//! - Currency / transaction-type breakdowns and record search
//! - Record sources (demo, JSON file, polled exchange API) and a JSON/CSV
//!   reporting router

mod aggregate;
mod breakdown;
mod client;
mod config;
mod export;
mod observability;
mod records;
mod reports;
mod source;
mod window;

pub use aggregate::{
    count_in_window, format_change_label, parse_field, parse_now, percentage_change,
    resolve_now, sum_in_window, window_over_window_change, AggregateError, AmountField,
    OverviewReport, PeriodAggregator, WindowComparison, WindowQuery, WindowReport, WindowResult,
};
pub use breakdown::{
    breakdown, distinct_values, newest_first, parse_group, search_records, totals_for,
    FieldTotals, GroupKey, GroupTotal, RecordFilter, UNKNOWN_GROUP,
};
pub use client::{
    api_client_config_from_env, endpoint_url, ApiClientConfig, ApiError, ExchangeApiClient,
    PROFITS_PATH, TRANSACTIONS_PATH,
};
pub use config::{
    parse_source_mode, server_config_from_env, ConfigError, ServerConfig, SourceMode,
    DEFAULT_ADDR, DEFAULT_REFRESH_INTERVAL_MS,
};
pub use export::{records_to_csv, write_records_csv, EXPORT_HEADERS};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_report_rejected, log_report_request,
    log_source_selected, logging_config_from_env, logging_config_from_lookup, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use records::{
    decode_records, parse_records_payload, parse_timestamp_str, parse_timestamp_value,
    raw_records_from_values, FinancialRecord, InvalidRecord, PayloadError, RawRecord,
    RecordBatch, RecordError,
};
pub use reports::{
    report_router, BreakdownResponse, ErrorBody, HealthResponse, OverviewResponse,
    RecordsResponse, SourceStatus, SummaryResponse, WindowRequest, DEFAULT_FIELD,
    DEFAULT_WINDOW,
};
pub use source::{
    demo_batch, InMemoryRecordSource, JsonFileRecordSource, PollingRecordSource, RecordFetcher,
    RecordSnapshot, RecordSource, SourceError,
};
pub use window::{parse_window, ReportCalendar, TimeWindow, ALL_WINDOWS};
