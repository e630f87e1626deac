//! Wire-value decoding: raw JSON scalars into typed [`Value`]s.
//!
//! The server gives no per-value type tag beyond JSON's own, and the remote
//! engine enforces column types as affinities only, so decoding is driven by
//! the compiled query's declared output type for each column. The one rule
//! that matters most: a numeric-looking string in a text column stays text
//! (zero-padded codes like "007" must survive), and a string in a numeric
//! column is accepted only if it parses cleanly.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as Json;
use sett_ir::{DataType, Value};

use crate::errors::ExecutionError;

fn coercion_failure(raw: &Json, ty: DataType) -> ExecutionError {
    ExecutionError::TypeCoercionFailure {
        value: raw.to_string(),
        ty,
    }
}

fn valid_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Datasette encodes blob cells as `{"$base64": true, "encoded": "..."}`.
fn blob_envelope(raw: &Json) -> Option<Vec<u8>> {
    let map = raw.as_object()?;
    if map.get("$base64") != Some(&Json::Bool(true)) {
        return None;
    }
    let encoded = map.get("encoded")?.as_str()?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

/// Decode one JSON scalar under the column's declared canonical type.
pub fn decode_value(raw: &Json, ty: DataType) -> Result<Value, ExecutionError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        DataType::Integer => match raw {
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    // Type affinity means an INTEGER column can still hold a
                    // real; pass it through rather than lying about it.
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| coercion_failure(raw, ty))
                }
            }
            Json::Bool(b) => Ok(Value::Int(*b as i64)),
            Json::String(s) => s
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| s.parse::<f64>().map(Value::Float))
                .map_err(|_| coercion_failure(raw, ty)),
            _ => Err(coercion_failure(raw, ty)),
        },
        DataType::Real => match raw {
            Json::Number(n) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| coercion_failure(raw, ty)),
            Json::String(s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| coercion_failure(raw, ty)),
            _ => Err(coercion_failure(raw, ty)),
        },
        DataType::Boolean => match raw {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => n
                .as_f64()
                .map(|f| Value::Bool(f != 0.0))
                .ok_or_else(|| coercion_failure(raw, ty)),
            Json::String(s) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => other
                    .parse::<f64>()
                    .map(|f| Value::Bool(f != 0.0))
                    .map_err(|_| coercion_failure(raw, ty)),
            },
            _ => Err(coercion_failure(raw, ty)),
        },
        DataType::Text => match raw {
            Json::String(s) => Ok(Value::Text(s.clone())),
            // A number where text was declared passes through as text.
            Json::Number(n) => Ok(Value::Text(n.to_string())),
            Json::Bool(b) => Ok(Value::Text((*b as i64).to_string())),
            _ => Err(coercion_failure(raw, ty)),
        },
        DataType::Timestamp => match raw {
            Json::String(s) if valid_timestamp(s) => Ok(Value::Timestamp(s.clone())),
            Json::Number(n) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|dt| Value::Timestamp(dt.to_rfc3339()))
                .ok_or_else(|| coercion_failure(raw, ty)),
            _ => Err(coercion_failure(raw, ty)),
        },
        DataType::Blob => blob_envelope(raw)
            .map(Value::Blob)
            .ok_or_else(|| coercion_failure(raw, ty)),
        DataType::Any => match raw {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| coercion_failure(raw, ty))
                }
            }
            Json::String(s) => Ok(Value::Text(s.clone())),
            _ => blob_envelope(raw)
                .map(Value::Blob)
                .ok_or_else(|| coercion_failure(raw, ty)),
        },
    }
}
