use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::canonical::canonical_json;

/// Values that can be bound as statement parameters or read back from a row.
///
/// One enum for every transport so callers never branch on driver types:
/// ```rust
/// use sql_resilient::prelude::*;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::from(None::<i64>),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// Structured JSON value; objects and arrays are bound as canonical text
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let SqlValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SqlValue::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(value) => Some(*value),
            SqlValue::Int(1) => Some(true),
            SqlValue::Int(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// JSON view of the value, as used for content hashing.
    ///
    /// Booleans become `0`/`1` because databases hand them back as integers; timestamps use
    /// the `%F %T%.f` text form and blobs are hex encoded.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
            }
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Bool(b) => JsonValue::from(i64::from(*b)),
            SqlValue::Timestamp(dt) => JsonValue::String(dt.format("%F %T%.f").to_string()),
            SqlValue::Json(value) => value.clone(),
            SqlValue::Blob(bytes) => JsonValue::String(hex::encode(bytes)),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

/// Absent values bind as SQL NULL.
impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// JSON scalars map onto the matching scalar; objects and arrays stay structured until
/// [`massage_value`] renders them.
impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map_or(SqlValue::Null, SqlValue::Float),
            },
            JsonValue::String(s) => SqlValue::Text(s),
            structured @ (JsonValue::Array(_) | JsonValue::Object(_)) => SqlValue::Json(structured),
        }
    }
}

/// Canonicalize one parameter before binding.
#[must_use]
pub fn massage_value(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Json(json) => match json {
            structured @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
                SqlValue::Text(canonical_json(&structured))
            }
            scalar => massage_value(SqlValue::from(scalar)),
        },
        other => other,
    }
}

/// Canonicalize a parameter list: structurally-equal objects always bind byte-identical text.
#[must_use]
pub fn massage_params(params: &[SqlValue]) -> Vec<SqlValue> {
    params.iter().cloned().map(massage_value).collect()
}
