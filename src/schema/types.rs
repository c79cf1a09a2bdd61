//! Column types and their casts.
//!
//! Entities hold column values as canonical JSON. Each [`FieldType`] knows
//! how to coerce caller input into that form (strictly, for writes), how to
//! turn a possibly sloppy filter value into a bindable parameter (leniently,
//! for comparisons), and how to decode its column from a result row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{Row, ValueRef};
use uuid::Uuid;

use crate::ast::SqlValue;
use crate::error::QueryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Uuid,
    Text,
    Integer,
    Float,
    Boolean,
    /// UTC timestamp stored as RFC 3339 text.
    #[serde(alias = "timestamp")]
    DateTime,
    Date,
    /// Arbitrary JSON stored as text.
    Json,
}

impl FieldType {
    /// DDL type name, shared by both dialects.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Uuid
            | FieldType::Text
            | FieldType::DateTime
            | FieldType::Date
            | FieldType::Json => "TEXT",
        }
    }

    /// Text columns sort case-insensitively.
    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::Text)
    }

    /// Type tag exposed in crud specs.
    pub fn spec_tag(&self) -> &'static str {
        match self {
            FieldType::Text => "string",
            FieldType::Integer => "int",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::DateTime | FieldType::Date => "date",
            FieldType::Uuid | FieldType::Json => "auto",
        }
    }

    /// Coerce caller input into the canonical stored form.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            FieldType::Uuid => match value {
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(|u| Value::String(u.hyphenated().to_string()))
                    .map_err(|e| format!("invalid UUID '{}': {}", s, e)),
                other => Err(format!("expected a UUID string, got {}", other)),
            },
            FieldType::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Bool(_) | Value::Number(_) => Ok(Value::String(value.to_string())),
                other => Err(format!("expected text, got {}", other)),
            },
            FieldType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(|| format!("expected an integer, got {}", n)),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("expected an integer, got '{}'", s)),
                other => Err(format!("expected an integer, got {}", other)),
            },
            FieldType::Float => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(Value::from)
                    .ok_or_else(|| format!("expected a number, got {}", n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| format!("expected a number, got '{}'", s)),
                other => Err(format!("expected a number, got {}", other)),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                    _ => Err(format!("expected a boolean, got '{}'", s)),
                },
                other => Err(format!("expected a boolean, got {}", other)),
            },
            FieldType::DateTime => match value {
                Value::String(s) => parse_datetime(s)
                    .map(|dt| Value::String(format_datetime(&dt)))
                    .ok_or_else(|| format!("expected an RFC 3339 timestamp, got '{}'", s)),
                other => Err(format!("expected a timestamp string, got {}", other)),
            },
            FieldType::Date => match value {
                Value::String(s) => parse_date(s)
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| format!("expected a YYYY-MM-DD date, got '{}'", s)),
                other => Err(format!("expected a date string, got {}", other)),
            },
            FieldType::Json => Ok(value.clone()),
        }
    }

    /// Bind a canonical value.
    pub fn bind(&self, value: &Value) -> SqlValue {
        match (self, value) {
            (_, Value::Null) => SqlValue::Null,
            (FieldType::Json, v) => SqlValue::Text(v.to_string()),
            (_, Value::Bool(b)) => SqlValue::Bool(*b),
            (_, Value::Number(n)) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            (_, Value::String(s)) => SqlValue::Text(s.clone()),
            (_, other) => SqlValue::Text(other.to_string()),
        }
    }

    /// Coerce then bind, for writes.
    pub fn write_value(&self, value: &Value) -> Result<SqlValue, String> {
        self.coerce(value).map(|v| self.bind(&v))
    }

    /// Best-effort parameter for comparing against this column.
    pub fn compare_value(&self, value: &Value) -> SqlValue {
        match self.coerce(value) {
            Ok(v) => self.bind(&v),
            Err(_) => raw_value(value),
        }
    }

    /// Decode this column from a result row.
    pub fn decode(&self, row: &AnyRow, idx: usize) -> QueryResult<Value> {
        // NULL carries no type under the Any driver, so typed decodes reject it.
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::Null);
        }
        let value = match self {
            FieldType::Integer => match row.try_get::<Option<i64>, _>(idx) {
                Ok(v) => v.map(Value::from).unwrap_or(Value::Null),
                Err(_) => decode_float(row, idx)?
                    .map(|f| Value::from(f as i64))
                    .unwrap_or(Value::Null),
            },
            FieldType::Float => decode_float(row, idx)?
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldType::Boolean => match row.try_get::<Option<bool>, _>(idx) {
                Ok(v) => v.map(Value::Bool).unwrap_or(Value::Null),
                Err(_) => row
                    .try_get::<Option<i64>, _>(idx)?
                    .map(|i| Value::Bool(i != 0))
                    .unwrap_or(Value::Null),
            },
            FieldType::Json => match row.try_get::<Option<String>, _>(idx)? {
                Some(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                None => Value::Null,
            },
            FieldType::Uuid | FieldType::Text | FieldType::DateTime | FieldType::Date => {
                row.try_get::<Option<String>, _>(idx)?
                    .map(Value::String)
                    .unwrap_or(Value::Null)
            }
        };
        Ok(value)
    }
}

fn decode_float(row: &AnyRow, idx: usize) -> QueryResult<Option<f64>> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(v.map(f64::from));
    }
    Ok(row.try_get::<Option<i64>, _>(idx)?.map(|i| i as f64))
}

/// Untyped JSON to parameter conversion.
pub fn raw_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => SqlValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Lenient timestamp parsing: RFC 3339, naive date-times taken as UTC, or a bare date.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime_prefix(s))
}

fn parse_datetime_prefix(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Fixed-width UTC rendering so text ordering matches time ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
