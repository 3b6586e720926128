//! Single-value type classification.
//!
//! [`classify`] applies an ordered list of checks; the first match wins. The order matters: a
//! value such as `"1/2/2020"` must be tested as a date before the numeric checks run, and
//! arrays/objects must never reach the scalar checks at all.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::RawValue;

static DATETIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d{1,2}/\d{1,2}/\d{2,4}\s+\d{1,2}:\d{1,2}(:\d{1,2})?\s*(am|pm)?$")
        .expect("Invalid regex pattern")
});
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}/\d{1,2}/\d{2,4}$").expect("Invalid regex pattern"));
static INTEGER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("Invalid regex pattern"));
static FLOAT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[\d,]+\.\d+$").expect("Invalid regex pattern"));
static BOOLEAN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(true|false|y|n|yes|no)$").expect("Invalid regex pattern")
});

/// Classification of a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeTag {
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    String,
    /// Arrays and objects.
    Text,
}

/// Optional exact-match date formats, in chrono `strftime` syntax (e.g. `%m/%d/%Y`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub date_formats: Vec<String>,
    pub datetime_formats: Vec<String>,
}

impl ClassifyOptions {
    /// Whether `value` strictly matches one of the configured date formats.
    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        if is_numeric_str(value) {
            return None;
        }
        self.date_formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
    }

    /// Whether `value` strictly matches one of the configured datetime formats.
    pub fn parse_datetime(&self, value: &str) -> Option<NaiveDateTime> {
        if is_numeric_str(value) {
            return None;
        }
        self.datetime_formats
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    }
}

// Values the integer or float checks would claim are never handed to a date format.
fn is_numeric_str(value: &str) -> bool {
    INTEGER_PATTERN.is_match(value) || FLOAT_PATTERN.is_match(value)
}

/// Classify a normalized value.
///
/// 1. array/object → [`TypeTag::Text`]
/// 2. configured datetime format, or `D/M/YYYY H:MM[:SS][ am|pm]` → [`TypeTag::DateTime`]
/// 3. configured date format, or `D/M/YYYY` → [`TypeTag::Date`]
/// 4. native integer, or a string of digits only → [`TypeTag::Integer`]
/// 5. native non-integer number, or `-?[\d,]+\.\d+` → [`TypeTag::Float`]
/// 6. native bool, or `true|false|y|n|yes|no` (any case) → [`TypeTag::Boolean`]
/// 7. otherwise [`TypeTag::String`]
///
/// Format matching never accepts a value that merely looks numeric, so a bare `"42"` is never
/// taken for a date.
pub fn classify(value: &RawValue, options: &ClassifyOptions) -> TypeTag {
    match value {
        RawValue::Array(_) | RawValue::Object(_) => TypeTag::Text,
        RawValue::Number(n) => {
            if n.is_i64() || n.is_u64() {
                TypeTag::Integer
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 => TypeTag::Integer,
                    Some(f) if f.is_finite() => TypeTag::Float,
                    _ => TypeTag::String,
                }
            }
        }
        RawValue::Bool(_) => TypeTag::Boolean,
        RawValue::String(s) => classify_str(s, options),
        RawValue::Null => TypeTag::String,
    }
}

fn classify_str(s: &str, options: &ClassifyOptions) -> TypeTag {
    if options.parse_datetime(s).is_some() || DATETIME_PATTERN.is_match(s) {
        TypeTag::DateTime
    } else if options.parse_date(s).is_some() || DATE_PATTERN.is_match(s) {
        TypeTag::Date
    } else if INTEGER_PATTERN.is_match(s) {
        TypeTag::Integer
    } else if FLOAT_PATTERN.is_match(s) {
        TypeTag::Float
    } else if BOOLEAN_PATTERN.is_match(s) {
        TypeTag::Boolean
    } else {
        TypeTag::String
    }
}
