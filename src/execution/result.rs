//! Query Result - Uniform result format from every engine

use crate::error::{BridgeError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Columns and rows produced by an engine, before timing is attached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { column_names, rows }
    }

    /// Convert a DataFrame, preserving its column order
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let column_names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let columns = df.get_columns();

        let mut rows = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            let mut row = Vec::with_capacity(columns.len());
            for series in columns {
                row.push(series_to_json_value(series, row_idx)?);
            }
            rows.push(row);
        }

        Ok(Self { column_names, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

/// Result returned to callers regardless of engine.
///
/// On error `column_names` and `rows` are always empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Wall-clock time from request entry to result construction
    #[serde(rename = "runtime")]
    pub elapsed_seconds: f64,
    pub error: Option<String>,
}

impl QueryResult {
    /// Create a successful result
    pub fn success(rows: RowSet, elapsed_seconds: f64) -> Self {
        Self {
            status: QueryStatus::Success,
            column_names: rows.column_names,
            rows: rows.rows,
            elapsed_seconds,
            error: None,
        }
    }

    /// Create an error result
    pub fn failure(error: impl Into<String>, elapsed_seconds: f64) -> Self {
        Self {
            status: QueryStatus::Error,
            column_names: Vec::new(),
            rows: Vec::new(),
            elapsed_seconds,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split back into rows, or the error message.
    pub fn into_row_set(self) -> std::result::Result<RowSet, String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(RowSet::new(self.column_names, self.rows)),
        }
    }
}

/// Map non-finite floats to null so results always serialize.
pub fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| BridgeError::Execution(format!("Failed to get value: {}", e)))?;
    any_value_to_json(any_val)
}

fn any_value_to_json(any_val: AnyValue) -> Result<Value> {
    if any_val.is_null() {
        return Ok(Value::Null);
    }

    let value = match any_val {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::Number(i.into()),
        AnyValue::Int16(i) => Value::Number(i.into()),
        AnyValue::Int32(i) => Value::Number(i.into()),
        AnyValue::Int64(i) => Value::Number(i.into()),
        AnyValue::UInt8(u) => Value::Number(u.into()),
        AnyValue::UInt16(u) => Value::Number(u.into()),
        AnyValue::UInt32(u) => Value::Number(u.into()),
        AnyValue::UInt64(u) => Value::Number(u.into()),
        AnyValue::Float32(f) => float_value(f as f64),
        AnyValue::Float64(f) => float_value(f),
        AnyValue::List(inner) => {
            let mut items = Vec::with_capacity(inner.len());
            for idx in 0..inner.len() {
                items.push(series_to_json_value(&inner, idx)?);
            }
            Value::Array(items)
        }
        // Temporal and remaining types render through polars' display form
        other => Value::String(other.to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_rows() {
        let df = df![
            "id" => [1i64, 2],
            "score" => [Some(0.5f64), None],
            "name" => ["x", "y"],
        ]
        .unwrap();

        let rows = RowSet::from_frame(&df).unwrap();
        assert_eq!(rows.column_names, vec!["id", "score", "name"]);
        assert_eq!(rows.rows[0], vec![Value::from(1), Value::from(0.5), Value::from("x")]);
        assert_eq!(rows.rows[1][1], Value::Null);
    }

    #[test]
    fn test_nan_becomes_null() {
        let df = df!["f" => [f64::NAN, 1.0]].unwrap();
        let rows = RowSet::from_frame(&df).unwrap();
        assert_eq!(rows.rows[0][0], Value::Null);
        assert_eq!(rows.rows[1][0], Value::from(1.0));
    }

    #[test]
    fn test_failure_has_no_rows() {
        let result = QueryResult::failure("boom", 0.25);
        assert_eq!(result.status, QueryStatus::Error);
        assert!(result.column_names.is_empty());
        assert!(result.rows.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["runtime"], 0.25);
        assert_eq!(json["error"], "boom");
    }
}
