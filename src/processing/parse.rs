//! Load-time coercion of raw values into typed [`Value`]s.
//!
//! Coercion never fails: a value that cannot be represented in the field's type becomes
//! [`Value::Null`].

use crate::inference::ClassifyOptions;
use crate::inference::normalize::normalize;
use crate::types::{FieldType, RawValue, Value};

const FALLBACK_DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];
const FALLBACK_DATETIME_FORMATS: [&str; 4] = [
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Coerce `raw` into a value of `field_type`.
///
/// The raw value is normalized first, so empty sentinels (`""`, `"n/a"`, ...) are always null.
pub fn parse_value(raw: &RawValue, field_type: FieldType, formats: &ClassifyOptions) -> Value {
    let Some(value) = normalize(raw) else {
        return Value::Null;
    };

    match field_type {
        FieldType::Boolean => to_bool(&value),
        FieldType::Integer | FieldType::BigInteger => to_integer(&value),
        FieldType::Float => to_float(&value),
        FieldType::Date => to_date(&value, formats),
        FieldType::DateTime => to_datetime(&value, formats),
        FieldType::String { .. } | FieldType::Text => to_string(&value),
    }
}

fn to_bool(value: &RawValue) -> Value {
    let b = match value {
        RawValue::Null => return Value::Null,
        RawValue::Bool(b) => *b,
        RawValue::String(s) => {
            !matches!(s.to_ascii_lowercase().as_str(), "false" | "f" | "n" | "no")
        }
        RawValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        RawValue::Array(_) | RawValue::Object(_) => true,
    };
    Value::Bool(b)
}

// Keeps digits, sign and decimal point: "$1,234.50" -> "1234.50".
fn numeric_chars(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect()
}

fn to_integer(value: &RawValue) -> Value {
    let f = match value {
        RawValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Value::Int64(i);
            }
            n.as_f64()
        }
        RawValue::String(s) => numeric_chars(s).parse::<f64>().ok(),
        RawValue::Bool(b) => return Value::Int64(i64::from(*b)),
        _ => None,
    };

    match f {
        Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Value::Int64(f.round() as i64),
        _ => Value::Null,
    }
}

fn to_float(value: &RawValue) -> Value {
    let f = match value {
        RawValue::Number(n) => n.as_f64(),
        RawValue::String(s) => numeric_chars(s).parse::<f64>().ok(),
        _ => None,
    };

    match f {
        Some(f) if f.is_finite() => Value::Float64(f),
        _ => Value::Null,
    }
}

fn to_date(value: &RawValue, formats: &ClassifyOptions) -> Value {
    let RawValue::String(s) = value else {
        return Value::Null;
    };
    formats
        .parse_date(s)
        .or_else(|| {
            FALLBACK_DATE_FORMATS
                .iter()
                .find_map(|fmt| chrono::NaiveDate::parse_from_str(s, fmt).ok())
        })
        .map_or(Value::Null, Value::Date)
}

fn to_datetime(value: &RawValue, formats: &ClassifyOptions) -> Value {
    let RawValue::String(s) = value else {
        return Value::Null;
    };
    formats
        .parse_datetime(s)
        .or_else(|| {
            FALLBACK_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        })
        .map_or(Value::Null, Value::DateTime)
}

fn to_string(value: &RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::String(s) if s.is_empty() => Value::Null,
        RawValue::String(s) => Value::Utf8(s.clone()),
        // Arrays and objects are stored as their JSON text.
        other => Value::Utf8(other.to_string()),
    }
}
