//! Relative reporting windows and their calendar-aware start instants.
//!
//! A window always ends at a reference instant `now` and reaches back by a
//! fixed calendar span:
//! - `day` / `week`: 1 / 7 calendar days
//! - `month` / `sixMonths` / `year`: 1 / 6 / 12 calendar months, landing on the
//!   same day-of-month when it exists and on the last day of the target month
//!   otherwise (March 31 minus one month is February 28 or 29)
//!
//! Calendar arithmetic happens in the wall-clock time of a [`ReportCalendar`]
//! (UTC unless configured otherwise).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, LocalResult, Months, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    SixMonths,
    Year,
}

pub const ALL_WINDOWS: [TimeWindow; 5] = [
    TimeWindow::Day,
    TimeWindow::Week,
    TimeWindow::Month,
    TimeWindow::SixMonths,
    TimeWindow::Year,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowSpan {
    Days(u64),
    Months(u32),
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::SixMonths => "sixMonths",
            TimeWindow::Year => "year",
        }
    }

    fn span(self) -> WindowSpan {
        match self {
            TimeWindow::Day => WindowSpan::Days(1),
            TimeWindow::Week => WindowSpan::Days(7),
            TimeWindow::Month => WindowSpan::Months(1),
            TimeWindow::SixMonths => WindowSpan::Months(6),
            TimeWindow::Year => WindowSpan::Months(12),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_window(s)
    }
}

pub fn parse_window(input: &str) -> Result<TimeWindow, AggregateError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "day" => Ok(TimeWindow::Day),
        "week" => Ok(TimeWindow::Week),
        "month" => Ok(TimeWindow::Month),
        "sixmonths" | "six_months" => Ok(TimeWindow::SixMonths),
        "year" => Ok(TimeWindow::Year),
        _ => Err(AggregateError::InvalidWindow(input.to_string())),
    }
}

/// Time zone whose wall clock drives month/day subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportCalendar {
    tz: Tz,
}

impl Default for ReportCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl ReportCalendar {
    pub fn utc() -> Self {
        Self { tz: chrono_tz::UTC }
    }

    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parses an IANA zone name such as `Africa/Lagos`.
    pub fn parse(name: &str) -> Result<Self, AggregateError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| AggregateError::InvalidTimeZone(name.to_string()))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn window_start(
        &self,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AggregateError> {
        let local = now.with_timezone(&self.tz).naive_local();
        let shifted = match window.span() {
            WindowSpan::Days(days) => local.checked_sub_days(Days::new(days)),
            WindowSpan::Months(months) => local.checked_sub_months(Months::new(months)),
        }
        .ok_or(AggregateError::OutOfRange { window, now })?;

        self.resolve_local(shifted)
            .ok_or(AggregateError::OutOfRange { window, now })
    }

    /// Start of the window immediately preceding the one ending at `now`.
    pub fn previous_window_start(
        &self,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AggregateError> {
        let current_start = self.window_start(window, now)?;
        self.window_start(window, current_start)
    }

    fn resolve_local(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => {
                // Wall-clock time skipped by a DST jump: apply the offset in
                // force before the gap, which moves forward by the gap length.
                let before = naive.checked_sub_signed(TimeDelta::hours(6))?;
                let offset = self
                    .tz
                    .from_local_datetime(&before)
                    .earliest()?
                    .offset()
                    .fix();
                let utc = naive
                    .checked_sub_signed(TimeDelta::seconds(i64::from(offset.local_minus_utc())))?;
                Some(Utc.from_utc_datetime(&utc))
            }
        }
    }
}
