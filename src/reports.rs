//! JSON/CSV reporting routes over a [`RecordSource`].

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{
    parse_field, parse_now, resolve_now, AggregateError, AmountField, OverviewReport,
    PeriodAggregator, WindowQuery, WindowReport,
};
use crate::breakdown::{
    breakdown, distinct_values, newest_first, parse_group, search_records, totals_for,
    FieldTotals, GroupKey, GroupTotal, RecordFilter,
};
use crate::export::records_to_csv;
use crate::observability::{log_report_rejected, log_report_request};
use crate::records::{
    decode_records, raw_records_from_values, FinancialRecord, InvalidRecord, RecordBatch,
};
use crate::source::{RecordSnapshot, RecordSource};
use crate::window::{parse_window, ReportCalendar, TimeWindow};

pub const DEFAULT_WINDOW: TimeWindow = TimeWindow::Month;
pub const DEFAULT_FIELD: AmountField = AmountField::AmountFee;

#[derive(Clone)]
struct ReportAppState {
    source: Arc<dyn RecordSource>,
    aggregator: PeriodAggregator,
}

pub fn report_router(source: Arc<dyn RecordSource>, calendar: ReportCalendar) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/reports/summary", get(get_summary))
        .route("/reports/overview", get(get_overview))
        .route("/reports/breakdown", get(get_breakdown))
        .route("/reports/records", get(get_records))
        .route("/reports/export.csv", get(get_export_csv))
        .route("/reports/window", post(post_window))
        .with_state(ReportAppState {
            source,
            aggregator: PeriodAggregator::new(calendar),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&RecordSnapshot> for SourceStatus {
    fn from(snapshot: &RecordSnapshot) -> Self {
        Self {
            fetched_at: snapshot.fetched_at,
            last_error: snapshot.last_error.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    pub window: Option<String>,
    pub field: Option<String>,
    pub now: Option<String>,
    pub currency: Option<String>,
    pub transaction_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    pub report: WindowReport,
    pub source: SourceStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverviewParams {
    pub field: Option<String>,
    pub now: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewResponse {
    #[serde(flatten)]
    pub overview: OverviewReport,
    pub source: SourceStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct BreakdownParams {
    pub group: Option<String>,
    pub selected: Option<String>,
    pub window: Option<String>,
    pub now: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownResponse {
    pub group: GroupKey,
    pub window: Option<TimeWindow>,
    pub window_start: Option<DateTime<Utc>>,
    pub values: Vec<String>,
    pub selected: Option<String>,
    pub selected_totals: FieldTotals,
    pub groups: Vec<GroupTotal>,
    pub rejected: Vec<InvalidRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordsParams {
    pub search: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub total: usize,
    pub records: Vec<FinancialRecord>,
    pub rejected: Vec<InvalidRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub window: Option<String>,
    pub now: Option<String>,
    pub currency: Option<String>,
    pub transaction_type: Option<String>,
}

/// Stateless aggregation over a posted batch. Records stay raw JSON so a
/// malformed element is rejected on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowRequest {
    pub records: Vec<Value>,
    pub window: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub now: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub records: usize,
    pub rejected: usize,
    pub source: SourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
enum RouteError {
    Query(AggregateError),
    Extract { status: StatusCode, message: String },
    Export(String),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            RouteError::Query(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            RouteError::Extract { status, message } => (status, message),
            RouteError::Export(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

fn reject(route: &str, err: AggregateError) -> RouteError {
    log_report_rejected(route, &err);
    RouteError::Query(err)
}

fn query_params<T>(route: &str, query: Result<Query<T>, QueryRejection>) -> Result<T, RouteError> {
    query.map(|Query(params)| params).map_err(|rejection| {
        log_report_rejected(route, &rejection);
        RouteError::Extract {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    })
}

fn json_body<T>(route: &str, body: Result<Json<T>, JsonRejection>) -> Result<T, RouteError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        log_report_rejected(route, &rejection);
        RouteError::Extract {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    })
}

fn parse_optional_now(raw: Option<&str>) -> Result<DateTime<Utc>, AggregateError> {
    let parsed = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_now)
        .transpose()?;
    Ok(resolve_now(parsed))
}

fn parse_optional_window(raw: Option<&str>) -> Result<Option<TimeWindow>, AggregateError> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_window)
        .transpose()
}

fn window_query(window: Option<&str>, field: Option<&str>) -> Result<WindowQuery, AggregateError> {
    Ok(WindowQuery {
        window: parse_optional_window(window)?.unwrap_or(DEFAULT_WINDOW),
        field: field
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(parse_field)
            .transpose()?
            .unwrap_or(DEFAULT_FIELD),
    })
}

fn since(batch: &RecordBatch, start: Option<DateTime<Utc>>) -> RecordBatch {
    match start {
        Some(start) => batch.filtered(|record| record.timestamp >= start),
        None => batch.clone(),
    }
}

async fn get_health(State(state): State<ReportAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    let status = if snapshot.last_error.is_some() {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        records: snapshot.batch.records.len(),
        rejected: snapshot.batch.rejected.len(),
        source: SourceStatus::from(&snapshot),
    })
}

async fn get_summary(
    State(state): State<ReportAppState>,
    query: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<SummaryResponse>, RouteError> {
    const ROUTE: &str = "/reports/summary";

    let params = query_params(ROUTE, query)?;
    let query = window_query(params.window.as_deref(), params.field.as_deref())
        .map_err(|err| reject(ROUTE, err))?;
    let now = parse_optional_now(params.now.as_deref()).map_err(|err| reject(ROUTE, err))?;

    let snapshot = state.source.snapshot();
    let filter = RecordFilter {
        currency: params.currency,
        transaction_type: params.transaction_type,
    };
    let batch = if filter.is_empty() {
        snapshot.batch.clone()
    } else {
        snapshot.batch.filtered(|record| filter.matches(record))
    };

    let report = state
        .aggregator
        .summarize(&batch, query, now)
        .map_err(|err| reject(ROUTE, err))?;
    log_report_request(
        ROUTE,
        Some(query.window),
        batch.records.len(),
        batch.rejected.len(),
    );

    Ok(Json(SummaryResponse {
        report,
        source: SourceStatus::from(&snapshot),
    }))
}

async fn get_overview(
    State(state): State<ReportAppState>,
    query: Result<Query<OverviewParams>, QueryRejection>,
) -> Result<Json<OverviewResponse>, RouteError> {
    const ROUTE: &str = "/reports/overview";

    let params = query_params(ROUTE, query)?;
    let query = window_query(None, params.field.as_deref()).map_err(|err| reject(ROUTE, err))?;
    let now = parse_optional_now(params.now.as_deref()).map_err(|err| reject(ROUTE, err))?;

    let snapshot = state.source.snapshot();
    let overview = state
        .aggregator
        .overview(&snapshot.batch, query.field, now)
        .map_err(|err| reject(ROUTE, err))?;
    log_report_request(
        ROUTE,
        None,
        snapshot.batch.records.len(),
        snapshot.batch.rejected.len(),
    );

    Ok(Json(OverviewResponse {
        overview,
        source: SourceStatus::from(&snapshot),
    }))
}

async fn get_breakdown(
    State(state): State<ReportAppState>,
    query: Result<Query<BreakdownParams>, QueryRejection>,
) -> Result<Json<BreakdownResponse>, RouteError> {
    const ROUTE: &str = "/reports/breakdown";

    let params = query_params(ROUTE, query)?;
    let group = parse_group(params.group.as_deref().unwrap_or("currency"))
        .map_err(|err| reject(ROUTE, err))?;
    let window =
        parse_optional_window(params.window.as_deref()).map_err(|err| reject(ROUTE, err))?;
    let now = parse_optional_now(params.now.as_deref()).map_err(|err| reject(ROUTE, err))?;
    let window_start = window
        .map(|window| state.aggregator.calendar().window_start(window, now))
        .transpose()
        .map_err(|err| reject(ROUTE, err))?;

    let snapshot = state.source.snapshot();
    let batch = since(&snapshot.batch, window_start);
    let selected = params
        .selected
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    log_report_request(ROUTE, window, batch.records.len(), batch.rejected.len());

    Ok(Json(BreakdownResponse {
        group,
        window,
        window_start,
        values: distinct_values(&batch.records, group),
        selected_totals: totals_for(&batch.records, group, selected.as_deref()),
        selected,
        groups: breakdown(&batch.records, group),
        rejected: batch.rejected,
    }))
}

async fn get_records(
    State(state): State<ReportAppState>,
    query: Result<Query<RecordsParams>, QueryRejection>,
) -> Result<Json<RecordsResponse>, RouteError> {
    const ROUTE: &str = "/reports/records";

    let params = query_params(ROUTE, query)?;
    let snapshot = state.source.snapshot();
    let matched = search_records(
        &snapshot.batch.records,
        params.search.as_deref().unwrap_or_default(),
    );
    let total = matched.len();
    let records: Vec<FinancialRecord> = newest_first(matched)
        .into_iter()
        .take(params.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    log_report_request(ROUTE, None, total, snapshot.batch.rejected.len());

    Ok(Json(RecordsResponse {
        total,
        records,
        rejected: snapshot.batch.rejected.clone(),
    }))
}

async fn get_export_csv(
    State(state): State<ReportAppState>,
    query: Result<Query<ExportParams>, QueryRejection>,
) -> Result<Response, RouteError> {
    const ROUTE: &str = "/reports/export.csv";

    let params = query_params(ROUTE, query)?;
    let window =
        parse_optional_window(params.window.as_deref()).map_err(|err| reject(ROUTE, err))?;
    let now = parse_optional_now(params.now.as_deref()).map_err(|err| reject(ROUTE, err))?;
    let window_start = window
        .map(|window| state.aggregator.calendar().window_start(window, now))
        .transpose()
        .map_err(|err| reject(ROUTE, err))?;

    let snapshot = state.source.snapshot();
    let filter = RecordFilter {
        currency: params.currency,
        transaction_type: params.transaction_type,
    };
    let batch = since(&snapshot.batch, window_start).filtered(|record| filter.matches(record));
    let body = records_to_csv(newest_first(&batch.records))
        .map_err(|err| RouteError::Export(format!("csv export failed: {err}")))?;
    log_report_request(ROUTE, window, batch.records.len(), batch.rejected.len());

    let filename = format!(
        "attachment; filename=\"report-{}.csv\"",
        window.map_or("all", TimeWindow::as_str)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    )
        .into_response())
}

async fn post_window(
    State(state): State<ReportAppState>,
    body: Result<Json<WindowRequest>, JsonRejection>,
) -> Result<Json<WindowReport>, RouteError> {
    const ROUTE: &str = "/reports/window";

    let request = json_body(ROUTE, body)?;
    let query = WindowQuery::parse(
        &request.window,
        request
            .field
            .as_deref()
            .unwrap_or(DEFAULT_FIELD.as_str()),
    )
    .map_err(|err| reject(ROUTE, err))?;
    let now = parse_optional_now(request.now.as_deref()).map_err(|err| reject(ROUTE, err))?;

    let batch = decode_records(&raw_records_from_values(request.records));
    let report = state
        .aggregator
        .summarize(&batch, query, now)
        .map_err(|err| reject(ROUTE, err))?;
    log_report_request(
        ROUTE,
        Some(query.window),
        batch.records.len(),
        batch.rejected.len(),
    );

    Ok(Json(report))
}
