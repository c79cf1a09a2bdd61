//! Date windows and report buckets over `Date` and `DateTime` columns.
//!
//! A [`DateRange`] is any combination of a start, an end and an
//! [`Interval`]. Missing ends are derived from the others: `start + interval`,
//! `end - interval`, or `now - interval` when only the interval is known.
//! The shifted bound is computed by the database (see
//! [`Expr::DateShift`](crate::ast::Expr::DateShift)); [`date_series`] computes
//! the report buckets for the same range client-side.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use serde_json::Value;

use crate::ast::{Expr, Operand, SqlValue};
use crate::error::{QueryError, QueryResult};
use crate::schema::{FieldType, format_datetime, parse_datetime};

/// Upper bound on buckets produced by one series.
pub const MAX_BUCKETS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        }
    }
}

/// A positive length of calendar time such as `1 month` or `3 days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub amount: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn new(amount: u32, unit: IntervalUnit) -> Self {
        Self { amount, unit }
    }

    pub fn months(amount: u32) -> Self {
        Self::new(amount, IntervalUnit::Month)
    }

    pub fn days(amount: u32) -> Self {
        Self::new(amount, IntervalUnit::Day)
    }

    /// Bucket width, `1 day` when unset or blank.
    pub fn granularity(text: Option<&str>) -> QueryResult<Self> {
        match text.map(str::trim) {
            None | Some("") => Ok(Self::days(1)),
            Some(text) => text.parse(),
        }
    }

    /// SQLite date modifier, e.g. `-1 months`. Weeks become days.
    pub fn sqlite_modifier(&self, backwards: bool) -> String {
        let sign = if backwards { '-' } else { '+' };
        let (amount, unit) = match self.unit {
            IntervalUnit::Week => (u64::from(self.amount) * 7, "days"),
            IntervalUnit::Second => (u64::from(self.amount), "seconds"),
            IntervalUnit::Minute => (u64::from(self.amount), "minutes"),
            IntervalUnit::Hour => (u64::from(self.amount), "hours"),
            IntervalUnit::Day => (u64::from(self.amount), "days"),
            IntervalUnit::Month => (u64::from(self.amount), "months"),
            IntervalUnit::Year => (u64::from(self.amount), "years"),
        };
        format!("{}{} {}", sign, amount, unit)
    }

    /// Move `at` by this interval. Month arithmetic clamps to the last day
    /// of a shorter month.
    pub fn shift(&self, at: NaiveDateTime, backwards: bool) -> Option<NaiveDateTime> {
        let months = match self.unit {
            IntervalUnit::Month => Some(self.amount),
            IntervalUnit::Year => self.amount.checked_mul(12),
            _ => None,
        };
        if let Some(months) = months {
            let months = Months::new(months);
            return if backwards {
                at.checked_sub_months(months)
            } else {
                at.checked_add_months(months)
            };
        }
        let amount = i64::from(self.amount);
        let delta = match self.unit {
            IntervalUnit::Second => Duration::try_seconds(amount),
            IntervalUnit::Minute => Duration::try_minutes(amount),
            IntervalUnit::Hour => Duration::try_hours(amount),
            IntervalUnit::Week => Duration::try_weeks(amount),
            _ => Duration::try_days(amount),
        }?;
        if backwards {
            at.checked_sub_signed(delta)
        } else {
            at.checked_add_signed(delta)
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::months(1)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.amount == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.amount, self.unit.as_str(), plural)
    }
}

impl FromStr for Interval {
    type Err = QueryError;

    /// `"3 days"`, `"1month"`, or a bare unit (`"week"`) meaning one of it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueryError::shape(format!("Invalid interval: '{}'", s));
        let text = s.trim();
        let digits = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
        let amount = match &text[..digits] {
            "" => 1,
            n => n.parse::<u32>().map_err(|_| invalid())?,
        };
        if amount == 0 {
            return Err(invalid());
        }
        let unit = match text[digits..].trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => IntervalUnit::Second,
            "min" | "mins" | "minute" | "minutes" => IntervalUnit::Minute,
            "h" | "hour" | "hours" => IntervalUnit::Hour,
            "d" | "day" | "days" => IntervalUnit::Day,
            "w" | "week" | "weeks" => IntervalUnit::Week,
            "mon" | "mons" | "month" | "months" => IntervalUnit::Month,
            "y" | "year" | "years" => IntervalUnit::Year,
            _ => return Err(invalid()),
        };
        Ok(Self { amount, unit })
    }
}

/// One side of a date window.
#[derive(Debug, Clone, PartialEq)]
pub enum DateBound {
    /// A canonical stored value.
    At(String),
    /// `base` moved by `interval`, computed by the database.
    Shifted {
        base: String,
        interval: Interval,
        backwards: bool,
    },
}

impl DateBound {
    /// Comparison operand for a column of type `ty`.
    pub fn operand(self, ty: FieldType) -> Operand {
        match self {
            DateBound::At(value) => Operand::Value(SqlValue::Text(value)),
            DateBound::Shifted {
                base,
                interval,
                backwards,
            } => Operand::Expr(Box::new(Expr::DateShift {
                base: SqlValue::Text(base),
                interval,
                backwards,
                date_only: ty == FieldType::Date,
            })),
        }
    }
}

/// Start, end and interval of a date window. Every part is optional; the
/// interval defaults to one month.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub interval: Option<Interval>,
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            interval: Some(Interval::default()),
        }
    }
}

impl DateRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, start: impl Into<Value>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<Value>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn interval(mut self, interval: Option<Interval>) -> Self {
        self.interval = interval;
        self
    }

    /// Lower and upper bounds, both inclusive, for a column of type `ty`.
    pub fn bounds(
        &self,
        ty: FieldType,
        now: DateTime<Utc>,
    ) -> QueryResult<(Option<DateBound>, Option<DateBound>)> {
        let start = self.canonical(ty, self.start.as_ref())?;
        let end = self.canonical(ty, self.end.as_ref())?;
        let shifted = |base: String, interval: Interval, backwards: bool| DateBound::Shifted {
            base,
            interval,
            backwards,
        };
        Ok(match (start, end, self.interval) {
            (Some(start), Some(end), _) => (Some(DateBound::At(start)), Some(DateBound::At(end))),
            (Some(start), None, Some(interval)) => (
                Some(DateBound::At(start.clone())),
                Some(shifted(start, interval, false)),
            ),
            (Some(start), None, None) => (Some(DateBound::At(start)), None),
            (None, Some(end), Some(interval)) => (
                Some(shifted(end.clone(), interval, true)),
                Some(DateBound::At(end)),
            ),
            (None, Some(end), None) => (None, Some(DateBound::At(end))),
            (None, None, Some(interval)) => {
                (Some(shifted(canonical_now(ty, now), interval, true)), None)
            }
            (None, None, None) => (None, None),
        })
    }

    fn canonical(&self, ty: FieldType, value: Option<&Value>) -> QueryResult<Option<String>> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        match ty.coerce(value) {
            Ok(Value::String(s)) => Ok(Some(s)),
            Ok(other) => Err(QueryError::shape(format!("Invalid date: {}", other))),
            Err(message) => Err(QueryError::shape(format!("Invalid date: {}", message))),
        }
    }

    fn instant(&self, ty: FieldType, value: Option<&Value>) -> QueryResult<Option<NaiveDateTime>> {
        Ok(self
            .canonical(ty, value)?
            .and_then(|s| parse_datetime(&s))
            .map(|dt| dt.naive_utc()))
    }
}

fn canonical_now(ty: FieldType, now: DateTime<Utc>) -> String {
    match ty {
        FieldType::Date => now.date_naive().format("%Y-%m-%d").to_string(),
        _ => format_datetime(&now),
    }
}

/// Bucket starts covering `range`, first to last inclusive, `granularity`
/// apart.
///
/// Unlike [`DateRange::bounds`], a range with no start and no end always
/// ends now, and a missing interval falls back to one month.
pub fn date_series(
    range: &DateRange,
    granularity: Interval,
    ty: FieldType,
    now: DateTime<Utc>,
) -> QueryResult<Vec<NaiveDateTime>> {
    let now = parse_datetime(&canonical_now(ty, now))
        .map(|dt| dt.naive_utc())
        .unwrap_or_else(|| now.naive_utc());
    let start = range.instant(ty, range.start.as_ref())?;
    let end = range.instant(ty, range.end.as_ref())?;
    let overflow = || QueryError::shape("Date range out of bounds");

    let (first, last) = match (start, end, range.interval) {
        (Some(start), Some(end), _) => (start, end),
        (Some(start), None, Some(interval)) => {
            (start, interval.shift(start, false).ok_or_else(overflow)?)
        }
        (Some(start), None, None) => (start, now),
        (None, end, interval) => {
            let end = end.unwrap_or(now);
            let interval = interval.unwrap_or_default();
            (interval.shift(end, true).ok_or_else(overflow)?, end)
        }
    };

    let mut series = Vec::new();
    let mut at = first;
    while at <= last {
        if series.len() == MAX_BUCKETS {
            return Err(QueryError::shape(format!(
                "Date series from {} to {} by {} exceeds {} buckets",
                first, last, granularity, MAX_BUCKETS
            )));
        }
        series.push(at);
        at = granularity.shift(at, false).ok_or_else(overflow)?;
    }
    Ok(series)
}

/// Label of a bucket start in the column's stored form.
pub fn bucket_label(ty: FieldType, at: NaiveDateTime) -> String {
    match ty {
        FieldType::Date => at.format("%Y-%m-%d").to_string(),
        _ => format_datetime(&at.and_utc()),
    }
}

/// Index of the bucket holding `at`: the last start not after it, provided
/// `at` falls before the end of that bucket.
pub fn bucket_index(series: &[NaiveDateTime], granularity: Interval, at: NaiveDateTime) -> Option<usize> {
    let index = series.partition_point(|start| *start <= at).checked_sub(1)?;
    let next = series
        .get(index + 1)
        .copied()
        .or_else(|| granularity.shift(series[index], false))?;
    (at < next).then_some(index)
}
