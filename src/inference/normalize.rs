//! Canonicalization of raw values before classification or parsing.

use crate::types::RawValue;

/// Written-out placeholders that mean "no value" (compared case-insensitively after trimming).
pub const EMPTY_SENTINELS: [&str; 7] =
    ["unspecified", "unknown", "none", "null", "empty", "n/a", ""];

/// Canonicalize a raw value.
///
/// - JSON `null` → `None`.
/// - Strings are trimmed; a trimmed value matching [`EMPTY_SENTINELS`] → `None`.
/// - Everything else passes through unchanged.
///
/// This is a total function: it never fails.
pub fn normalize(raw: &RawValue) -> Option<RawValue> {
    match raw {
        RawValue::Null => None,
        RawValue::String(s) => {
            let trimmed = s.trim();
            if is_empty_sentinel(trimmed) {
                None
            } else {
                Some(RawValue::String(trimmed.to_string()))
            }
        }
        other => Some(other.clone()),
    }
}

fn is_empty_sentinel(trimmed: &str) -> bool {
    EMPTY_SENTINELS
        .iter()
        .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
}

/// Length of the value as rendered to a string. Used for width estimation.
pub fn rendered_len(value: &RawValue) -> usize {
    match value {
        RawValue::Null => 0,
        RawValue::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}
