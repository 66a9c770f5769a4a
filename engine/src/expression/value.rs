//! Runtime values and the casting rules between them.

use crate::error::ExpressionError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value produced or consumed by an expression.
///
/// Strings keep their text form until an operator asks for a number or a
/// date; the cast happens at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

/// Type requested by an operator or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Number,
    Boolean,
    Text,
    Date,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Number => "Double",
            ValueType::Boolean => "Boolean",
            ValueType::Text => "String",
            ValueType::Date => "Date",
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type of a non-null value.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Boolean),
            Value::Number(_) => Some(ValueType::Number),
            Value::Text(_) => Some(ValueType::Text),
            Value::Date(_) => Some(ValueType::Date),
        }
    }

    fn found(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean value",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Date(_) => "date",
        }
    }

    /// Cast to `target`. Null stays null.
    ///
    /// Numbers become text on request; strings are parsed into numbers and
    /// dates. Every other mismatch is an error.
    pub fn cast(&self, target: ValueType) -> Result<Value, ExpressionError> {
        let mismatch = || ExpressionError::TypeMismatch {
            expected: target.name(),
            found: self.found(),
        };

        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),

            (Value::Number(n), ValueType::Text) => Ok(Value::Text(format_number(*n))),
            (Value::Number(_), ValueType::Number) => Ok(self.clone()),
            (Value::Number(_), _) => Err(mismatch()),

            (Value::Text(s), ValueType::Date) => parse_date(s).map(Value::Date),
            (Value::Text(s), ValueType::Number) => s
                .trim()
                .parse()
                .map(Value::Number)
                .map_err(|_| ExpressionError::NumberParse(s.clone())),
            (Value::Text(_), ValueType::Text) => Ok(self.clone()),
            (Value::Text(_), _) => Err(mismatch()),

            (Value::Bool(_), ValueType::Boolean) => Ok(self.clone()),
            (Value::Bool(_), _) => Err(mismatch()),

            (Value::Date(_), ValueType::Date) => Ok(self.clone()),
            (Value::Date(_), _) => Err(ExpressionError::Cast {
                expected: target.name(),
            }),
        }
    }

    pub fn to_number(&self) -> Result<Option<f64>, ExpressionError> {
        match self.cast(ValueType::Number)? {
            Value::Number(n) => Ok(Some(n)),
            _ => Ok(None),
        }
    }

    /// Number cast that reads null as `0.0`.
    pub fn to_number_or_zero(&self) -> Result<f64, ExpressionError> {
        Ok(self.to_number()?.unwrap_or(0.0))
    }

    pub fn to_bool(&self) -> Result<Option<bool>, ExpressionError> {
        match self.cast(ValueType::Boolean)? {
            Value::Bool(b) => Ok(Some(b)),
            _ => Ok(None),
        }
    }

    pub fn to_text(&self) -> Result<Option<String>, ExpressionError> {
        match self.cast(ValueType::Text)? {
            Value::Text(s) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    pub fn to_date(&self) -> Result<Option<NaiveDate>, ExpressionError> {
        match self.cast(ValueType::Date)? {
            Value::Date(d) => Ok(Some(d)),
            _ => Ok(None),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// `30.0` renders as `30`, `2.5` as `2.5`.
pub fn format_number(n: f64) -> String {
    format!("{n}")
}

/// Parse an ISO date, accepting a trailing time part.
pub fn parse_date(text: &str) -> Result<NaiveDate, ExpressionError> {
    let trimmed = text.trim();
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ExpressionError::DateParse(text.to_string()))
}
