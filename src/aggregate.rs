//! Period aggregation over record batches.
//!
//! Everything here is a pure function of `(records, window, field, now)`:
//! no I/O and no state carried between calls. The current window is
//! `[now - d, ...)` and the preceding one is `[now - 2d, now - d)`, where the
//! second boundary comes from applying the same calendar span to `now - d`.
//! A record sitting exactly on `now - d` therefore counts in the current
//! window only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::{FinancialRecord, InvalidRecord, RecordBatch};
use crate::window::{parse_window, ReportCalendar, TimeWindow, ALL_WINDOWS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("invalid time window '{0}'; expected one of day, week, month, sixMonths, year")]
    InvalidWindow(String),
    #[error(
        "invalid aggregation field '{0}'; expected one of amountPrimary, amountFee, cryptoAmount, cryptoFee"
    )]
    InvalidField(String),
    #[error("invalid group key '{0}'; expected currency or transactionType")]
    InvalidGroup(String),
    #[error("invalid time zone '{0}'")]
    InvalidTimeZone(String),
    #[error("invalid reference instant '{0}'; expected RFC 3339")]
    InvalidNow(String),
    #[error("{window} window ending at {now} falls outside the supported date range")]
    OutOfRange {
        window: TimeWindow,
        now: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AmountField {
    AmountPrimary,
    AmountFee,
    CryptoAmount,
    CryptoFee,
}

impl AmountField {
    pub fn as_str(self) -> &'static str {
        match self {
            AmountField::AmountPrimary => "amountPrimary",
            AmountField::AmountFee => "amountFee",
            AmountField::CryptoAmount => "cryptoAmount",
            AmountField::CryptoFee => "cryptoFee",
        }
    }
}

impl fmt::Display for AmountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AmountField {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s)
    }
}

pub fn parse_field(input: &str) -> Result<AmountField, AggregateError> {
    match input.trim() {
        "amountPrimary" | "amount_primary" | "nairaAmount" => Ok(AmountField::AmountPrimary),
        "amountFee" | "amount_fee" | "nairaFee" => Ok(AmountField::AmountFee),
        "cryptoAmount" | "crypto_amount" => Ok(AmountField::CryptoAmount),
        "cryptoFee" | "crypto_fee" => Ok(AmountField::CryptoFee),
        _ => Err(AggregateError::InvalidField(input.to_string())),
    }
}

/// Parses an RFC 3339 reference instant. A space in place of the `+` of a
/// positive offset is accepted, since an unencoded `+` in a query string
/// decodes to a space.
pub fn parse_now(raw: &str) -> Result<DateTime<Utc>, AggregateError> {
    let trimmed = raw.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|err| match trimmed.rsplit_once(' ') {
            Some((stamp, offset)) if offset.starts_with(|c: char| c.is_ascii_digit()) => {
                DateTime::parse_from_rfc3339(&format!("{stamp}+{offset}"))
            }
            _ => Err(err),
        })
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AggregateError::InvalidNow(raw.to_string()))
}

pub fn resolve_now(now: Option<DateTime<Utc>>) -> DateTime<Utc> {
    now.unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowQuery {
    pub window: TimeWindow,
    pub field: AmountField,
}

impl WindowQuery {
    pub fn new(window: TimeWindow, field: AmountField) -> Self {
        Self { window, field }
    }

    /// Validates both keys up front so a typo never reads as "no data".
    pub fn parse(window_key: &str, field_key: &str) -> Result<Self, AggregateError> {
        Ok(Self {
            window: parse_window(window_key)?,
            field: parse_field(field_key)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window_start: DateTime<Utc>,
    pub sum: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowComparison {
    pub current: f64,
    pub previous: f64,
    pub percentage_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub window: TimeWindow,
    pub field: AmountField,
    pub now: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub previous_window_start: DateTime<Utc>,
    pub sum: f64,
    pub count: usize,
    pub previous_sum: f64,
    pub previous_count: usize,
    pub percentage_change: f64,
    pub change_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<InvalidRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewReport {
    pub now: DateTime<Utc>,
    pub field: AmountField,
    pub windows: Vec<WindowReport>,
    #[serde(default)]
    pub rejected: Vec<InvalidRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodAggregator {
    calendar: ReportCalendar,
}

impl PeriodAggregator {
    pub fn new(calendar: ReportCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> ReportCalendar {
        self.calendar
    }

    pub fn window_result(
        &self,
        records: &[FinancialRecord],
        window: TimeWindow,
        field: AmountField,
        now: DateTime<Utc>,
    ) -> Result<WindowResult, AggregateError> {
        let window_start = self.calendar.window_start(window, now)?;
        let (sum, count) = fold_range(records, field, window_start, None);
        Ok(WindowResult {
            window_start,
            sum,
            count,
        })
    }

    pub fn sum_in_window(
        &self,
        records: &[FinancialRecord],
        window: TimeWindow,
        field: AmountField,
        now: DateTime<Utc>,
    ) -> Result<f64, AggregateError> {
        Ok(self.window_result(records, window, field, now)?.sum)
    }

    pub fn count_in_window(
        &self,
        records: &[FinancialRecord],
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<usize, AggregateError> {
        let window_start = self.calendar.window_start(window, now)?;
        Ok(records
            .iter()
            .filter(|record| record.timestamp >= window_start)
            .count())
    }

    pub fn window_over_window_change(
        &self,
        records: &[FinancialRecord],
        window: TimeWindow,
        field: AmountField,
        now: DateTime<Utc>,
    ) -> Result<WindowComparison, AggregateError> {
        let report = self.report(records, WindowQuery::new(window, field), now)?;
        Ok(WindowComparison {
            current: report.sum,
            previous: report.previous_sum,
            percentage_change: report.percentage_change,
        })
    }

    /// Current and previous window figures plus the rejected-record list.
    pub fn summarize(
        &self,
        batch: &RecordBatch,
        query: WindowQuery,
        now: DateTime<Utc>,
    ) -> Result<WindowReport, AggregateError> {
        let mut report = self.report(&batch.records, query, now)?;
        report.rejected = batch.rejected.clone();
        Ok(report)
    }

    /// One report per window, as shown in the dashboard stat boxes.
    pub fn overview(
        &self,
        batch: &RecordBatch,
        field: AmountField,
        now: DateTime<Utc>,
    ) -> Result<OverviewReport, AggregateError> {
        let windows = ALL_WINDOWS
            .iter()
            .map(|window| self.report(&batch.records, WindowQuery::new(*window, field), now))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OverviewReport {
            now,
            field,
            windows,
            rejected: batch.rejected.clone(),
        })
    }

    fn report(
        &self,
        records: &[FinancialRecord],
        query: WindowQuery,
        now: DateTime<Utc>,
    ) -> Result<WindowReport, AggregateError> {
        let window_start = self.calendar.window_start(query.window, now)?;
        let previous_window_start = self.calendar.window_start(query.window, window_start)?;

        let (sum, count) = fold_range(records, query.field, window_start, None);
        let (previous_sum, previous_count) = fold_range(
            records,
            query.field,
            previous_window_start,
            Some(window_start),
        );
        let change = percentage_change(sum, previous_sum);

        Ok(WindowReport {
            window: query.window,
            field: query.field,
            now,
            window_start,
            previous_window_start,
            sum,
            count,
            previous_sum,
            previous_count,
            percentage_change: change,
            change_label: format_change_label(change),
            rejected: Vec::new(),
        })
    }
}

pub fn sum_in_window(
    records: &[FinancialRecord],
    window: TimeWindow,
    field: AmountField,
    now: DateTime<Utc>,
) -> Result<f64, AggregateError> {
    PeriodAggregator::default().sum_in_window(records, window, field, now)
}

pub fn count_in_window(
    records: &[FinancialRecord],
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<usize, AggregateError> {
    PeriodAggregator::default().count_in_window(records, window, now)
}

pub fn window_over_window_change(
    records: &[FinancialRecord],
    window: TimeWindow,
    field: AmountField,
    now: DateTime<Utc>,
) -> Result<WindowComparison, AggregateError> {
    PeriodAggregator::default().window_over_window_change(records, window, field, now)
}

/// Signed percent change, unrounded. A zero `previous` yields `0`, which
/// callers must not read as "unchanged" when `current` is non-zero.
pub fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    ((current - previous) / previous) * 100.0
}

pub fn format_change_label(change: f64) -> String {
    if change >= 0.0 {
        format!("+{change:.2}%")
    } else {
        format!("{change:.2}%")
    }
}

fn fold_range(
    records: &[FinancialRecord],
    field: AmountField,
    start_inclusive: DateTime<Utc>,
    end_exclusive: Option<DateTime<Utc>>,
) -> (f64, usize) {
    records
        .iter()
        .filter(|record| record.timestamp >= start_inclusive)
        .filter(|record| end_exclusive.map_or(true, |end| record.timestamp < end))
        .fold((0.0, 0), |(sum, count), record| {
            (sum + record.amount(field), count + 1)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0)
            .single()
            .expect("valid UTC timestamp expected")
    }

    fn fee_at(ts: DateTime<Utc>, fee: f64) -> FinancialRecord {
        FinancialRecord::new(ts, fee * 10.0, fee)
    }

    #[test]
    fn parses_field_keys_and_aliases() {
        assert_eq!(parse_field("amountPrimary").unwrap(), AmountField::AmountPrimary);
        assert_eq!(parse_field("nairaFee").unwrap(), AmountField::AmountFee);
        assert_eq!(parse_field("cryptoFee").unwrap(), AmountField::CryptoFee);
        assert_eq!(
            parse_field("amountFees").expect_err("typo"),
            AggregateError::InvalidField("amountFees".to_string())
        );
    }

    #[test]
    fn window_query_reports_window_error_before_field_error() {
        let err = WindowQuery::parse("fortnight", "bogus").expect_err("both keys invalid");
        assert_eq!(err, AggregateError::InvalidWindow("fortnight".to_string()));
    }

    #[test]
    fn percentage_change_policy() {
        assert_eq!(percentage_change(110.0, 100.0), 10.0);
        assert_eq!(percentage_change(90.0, 100.0), -10.0);
        assert_eq!(percentage_change(42.0, 0.0), 0.0);
        assert_eq!(percentage_change(0.0, 0.0), 0.0);
        assert_eq!(percentage_change(0.0, 50.0), -100.0);
    }

    #[test]
    fn change_label_is_signed_with_two_decimals() {
        assert_eq!(format_change_label(10.0), "+10.00%");
        assert_eq!(format_change_label(-3.456), "-3.46%");
        assert_eq!(format_change_label(0.0), "+0.00%");
    }

    #[test]
    fn sums_and_counts_by_window() {
        let now = now();
        let records = vec![
            fee_at(now - TimeDelta::hours(2), 100.0),
            fee_at(now - TimeDelta::days(10), 50.0),
        ];

        assert_eq!(
            sum_in_window(&records, TimeWindow::Day, AmountField::AmountFee, now).unwrap(),
            100.0
        );
        assert_eq!(
            sum_in_window(&records, TimeWindow::Week, AmountField::AmountFee, now).unwrap(),
            100.0
        );
        assert_eq!(
            sum_in_window(&records, TimeWindow::Month, AmountField::AmountFee, now).unwrap(),
            150.0
        );
        assert_eq!(
            sum_in_window(&records, TimeWindow::Month, AmountField::AmountPrimary, now).unwrap(),
            1_500.0
        );
        assert_eq!(count_in_window(&records, TimeWindow::Week, now).unwrap(), 1);
        assert_eq!(count_in_window(&records, TimeWindow::Year, now).unwrap(), 2);
    }

    #[test]
    fn empty_batch_counts_zero_for_every_window() {
        for window in ALL_WINDOWS {
            assert_eq!(count_in_window(&[], window, now()).unwrap(), 0);
            assert_eq!(
                sum_in_window(&[], window, AmountField::AmountFee, now()).unwrap(),
                0.0
            );
        }
    }

    #[test]
    fn boundary_record_belongs_to_current_window_only() {
        let now = now();
        let boundary = now - TimeDelta::days(7);
        let records = vec![
            fee_at(boundary, 40.0),
            fee_at(boundary - TimeDelta::seconds(1), 20.0),
        ];

        let change =
            window_over_window_change(&records, TimeWindow::Week, AmountField::AmountFee, now)
                .unwrap();
        assert_eq!(change.current, 40.0);
        assert_eq!(change.previous, 20.0);
        assert_eq!(change.percentage_change, 100.0);
    }

    #[test]
    fn previous_window_excludes_records_older_than_two_spans() {
        let now = now();
        let records = vec![
            fee_at(now - TimeDelta::hours(1), 110.0),
            fee_at(now - TimeDelta::hours(30), 100.0),
            fee_at(now - TimeDelta::hours(49), 1_000.0),
        ];

        let change =
            window_over_window_change(&records, TimeWindow::Day, AmountField::AmountFee, now)
                .unwrap();
        assert_eq!(change.current, 110.0);
        assert_eq!(change.previous, 100.0);
        assert!((change.percentage_change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_carries_rejections_and_previous_figures() {
        let now = now();
        let batch = RecordBatch {
            records: vec![
                fee_at(now - TimeDelta::days(3), 90.0),
                fee_at(now - TimeDelta::days(9), 100.0),
            ],
            rejected: vec![InvalidRecord {
                index: 2,
                id: Some("p3".to_string()),
                reason: "unparseable timestamp 'n/a'".to_string(),
            }],
        };

        let report = PeriodAggregator::default()
            .summarize(
                &batch,
                WindowQuery::new(TimeWindow::Week, AmountField::AmountFee),
                now,
            )
            .unwrap();

        assert_eq!(report.window_start, now - TimeDelta::days(7));
        assert_eq!(report.previous_window_start, now - TimeDelta::days(14));
        assert_eq!(report.sum, 90.0);
        assert_eq!(report.count, 1);
        assert_eq!(report.previous_sum, 100.0);
        assert_eq!(report.previous_count, 1);
        assert_eq!(report.change_label, "-10.00%");
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn overview_covers_every_window_in_order() {
        let now = now();
        let batch = RecordBatch::from_records(vec![fee_at(now - TimeDelta::days(100), 5.0)]);
        let overview = PeriodAggregator::default()
            .overview(&batch, AmountField::AmountFee, now)
            .unwrap();

        let windows: Vec<_> = overview.windows.iter().map(|r| r.window).collect();
        assert_eq!(windows, ALL_WINDOWS.to_vec());
        assert_eq!(overview.windows[2].sum, 0.0);
        assert_eq!(overview.windows[3].sum, 5.0);
        assert_eq!(overview.windows[4].sum, 5.0);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let now = now();
        let records = vec![fee_at(now - TimeDelta::days(2), 12.5)];
        let first = sum_in_window(&records, TimeWindow::Week, AmountField::AmountFee, now);
        let second = sum_in_window(&records, TimeWindow::Week, AmountField::AmountFee, now);
        assert_eq!(first, second);
    }

    #[test]
    fn parse_now_accepts_rfc3339_offsets() {
        assert_eq!(parse_now("2024-06-15T13:00:00+01:00").unwrap(), now());
        assert_eq!(parse_now("2024-06-15T13:00:00 01:00").unwrap(), now());
        assert!(parse_now("2024-06-15T13:00:00 Z").is_err());
        assert!(matches!(parse_now("June 15"), Err(AggregateError::InvalidNow(_))));
    }
}
