//! Field validators run on every plain attribute assignment.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::{QueryError, QueryResult};

/// Custom check over the assigned value.
pub type CheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
enum Check {
    Length {
        min: Option<usize>,
        max: Option<usize>,
        allow_none: bool,
    },
    Regex(Regex),
    Custom(CheckFn),
}

/// A validator bound to one field, with the hints it publishes in crud specs.
#[derive(Clone)]
pub struct FieldValidator {
    field: String,
    check: Check,
    message: String,
    spec: Map<String, Value>,
}

const MIN_TEXT: &str = "The minimum length of this field is {0}.";
const MAX_TEXT: &str = "The maximum length of this field is {0}.";

fn or_none(v: Option<usize>) -> String {
    v.map_or_else(|| "None".to_string(), |v| v.to_string())
}

impl FieldValidator {
    /// Text length bounds (inclusive); `None` values pass.
    pub fn text_length(field: impl Into<String>, min: Option<usize>, max: Option<usize>) -> Self {
        Self::text_length_with(field, min, max, Some(MIN_TEXT), Some(MAX_TEXT), true)
    }

    pub fn text_length_with(
        field: impl Into<String>,
        min: Option<usize>,
        max: Option<usize>,
        min_text: Option<&str>,
        max_text: Option<&str>,
        allow_none: bool,
    ) -> Self {
        let mut spec = Map::new();
        if let Some(min) = min {
            spec.insert("minLength".into(), json!(min));
            if let Some(text) = min_text {
                spec.insert("minLengthText".into(), json!(text));
            }
        }
        if let Some(max) = max {
            spec.insert("maxLength".into(), json!(max));
            if let Some(text) = max_text {
                spec.insert("maxLengthText".into(), json!(text));
            }
        }
        Self {
            field: field.into(),
            check: Check::Length {
                min,
                max,
                allow_none,
            },
            message: format!(
                "Length of value should be between {} and {} (inclusive; None means no min/max).",
                or_none(min),
                or_none(max)
            ),
            spec,
        }
    }

    /// Regex search over the value; `None` values pass.
    pub fn regex(
        field: impl Into<String>,
        pattern: &str,
        message: impl Into<String>,
    ) -> QueryResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| QueryError::Schema(format!("invalid regex '{}': {}", pattern, e)))?;
        let message = message.into();
        let mut spec = Map::new();
        spec.insert("regexText".into(), json!(message));
        spec.insert("regexString".into(), json!(pattern));
        Ok(Self {
            field: field.into(),
            check: Check::Regex(re),
            message,
            spec,
        })
    }

    /// Arbitrary check.
    pub fn custom<F>(field: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            check: Check::Custom(Arc::new(check)),
            message: message.into(),
            spec: Map::new(),
        }
    }

    /// Add a client-facing hint to the crud spec.
    pub fn with_spec(mut self, key: impl Into<String>, value: Value) -> Self {
        self.spec.insert(key.into(), value);
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn spec(&self) -> &Map<String, Value> {
        &self.spec
    }

    pub fn check(&self, value: &Value) -> bool {
        match &self.check {
            Check::Length {
                min,
                max,
                allow_none,
            } => {
                if value.is_null() {
                    return *allow_none;
                }
                let len = text_of(value).chars().count();
                min.is_none_or(|m| len >= m) && max.is_none_or(|m| len <= m)
            }
            Check::Regex(re) => value.is_null() || re.is_match(&text_of(value)),
            Check::Custom(f) => f(value),
        }
    }

    /// Fail with a validation error naming `model.field`.
    pub fn validate(&self, model: &str, value: &Value) -> QueryResult<()> {
        if self.check(value) {
            Ok(())
        } else {
            Err(QueryError::Validation {
                model: model.to_string(),
                field: self.field.clone(),
                value: value.to_string(),
                message: self.message.clone(),
            })
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for FieldValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.check {
            Check::Length { .. } => "length",
            Check::Regex(_) => "regex",
            Check::Custom(_) => "custom",
        };
        f.debug_struct("FieldValidator")
            .field("field", &self.field)
            .field("kind", &kind)
            .field("message", &self.message)
            .finish()
    }
}
