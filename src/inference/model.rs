//! Schema inference from a sample of rows.

use std::sync::LazyLock;

use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::naming::{SqlNamer, camel_case, snake_case};
use crate::types::{Field, FieldType, Index, Model, RawValue, Row};

use super::classify::{ClassifyOptions, TypeTag, classify};
use super::normalize::{normalize, rendered_len};

/// Strings whose doubled max length stays below this are modeled as bounded strings.
pub const STRING_WIDTH_LIMIT: usize = 240;

/// Integer columns with more digits than this are widened to 64-bit.
pub const BIG_INTEGER_DIGITS: usize = 8;

/// Column names that look numeric but are identifiers (zip codes, phone numbers, ids).
static KNOWN_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|\s|_|-)(zip|phone|id)(_|\s|-|$)").expect("Invalid regex pattern")
});

/// Default index policy, applied to the snake_case column name.
static DEFAULT_INDEX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|_)(id|name|key|amount|amt)($|_)").expect("Invalid regex pattern")
});

/// Which columns receive a single-column (non-unique) index.
#[derive(Debug, Clone, Default)]
pub enum IndexPattern {
    /// Whole words `id`, `name`, `key`, `amount`, `amt`.
    #[default]
    Default,
    /// Caller supplied pattern; replaces the default entirely.
    Custom(Regex),
}

impl IndexPattern {
    /// Compile a caller supplied pattern, matched case-insensitively.
    pub fn custom(pattern: &str) -> LoadResult<Self> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self::Custom(re))
    }

    /// Parse the command-line form: `/regex/` (flags after the last slash are ignored) or a
    /// comma-separated list of alternatives anchored as `^(a|b)$`. List entries are regex
    /// fragments, so `.*key|.*id` works as well as plain names.
    pub fn from_cli(value: &str) -> LoadResult<Self> {
        match value.strip_prefix('/') {
            Some(rest) => {
                let body = rest.rfind('/').map_or(rest, |end| &rest[..end]);
                Self::custom(body)
            }
            None => {
                let names: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect();
                Self::custom(&format!("^({})$", names.join("|")))
            }
        }
    }

    pub fn matches(&self, column_name: &str) -> bool {
        let name = snake_case(column_name);
        match self {
            Self::Default => DEFAULT_INDEX_PATTERN.is_match(&name),
            Self::Custom(re) => re.is_match(&name),
        }
    }
}

/// Inputs to [`infer_model`].
#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    /// Table name for the inferred model (already SQL-safe or raw; it is normalized).
    pub table_name: String,
    pub classify: ClassifyOptions,
    pub index_pattern: IndexPattern,
    /// Declared key columns (source labels or target names). Empty = synthetic key.
    pub key: Vec<String>,
}

/// Whether a column should get a single-column index under `pattern`.
pub fn should_index(column_name: &str, pattern: &IndexPattern) -> bool {
    pattern.matches(column_name)
}

/// Infer a [`Model`] from sample rows.
///
/// Columns are discovered from the shape of the first row only; a column missing from it is
/// not modeled. An empty sample yields a model with only the synthetic key (or an error when
/// keys were declared, since they cannot be resolved).
pub fn infer_model(sample: &[Row], options: &InferenceOptions) -> LoadResult<Model> {
    let columns: Vec<&String> = sample.first().map(|r| r.keys().collect()).unwrap_or_default();

    // Columns are independent; classify them in parallel and keep source order.
    let types: Vec<FieldType> = columns
        .par_iter()
        .map(|column| {
            let values: Vec<&RawValue> = sample
                .iter()
                .map(|row| row.get(column.as_str()).unwrap_or(&RawValue::Null))
                .collect();
            let is_key = is_declared_key(column, &options.key);
            column_type(&values, column, &options.classify, is_key)
        })
        .collect();

    let mut namer = SqlNamer::new();
    let mut fields = Vec::with_capacity(columns.len() + 1);
    let mut indexes = Vec::new();

    for (column, field_type) in columns.iter().zip(types) {
        let name = namer.sql_name(column);
        if should_index(column, &options.index_pattern) {
            indexes.push(Index::single(name.clone()));
        }
        fields.push(Field::new(column.as_str(), name, field_type));
    }

    if options.key.is_empty() {
        fields.insert(0, Field::synthetic_key());
    } else {
        let mut key_names = Vec::with_capacity(options.key.len());
        for key in &options.key {
            let field = fields
                .iter_mut()
                .find(|f| {
                    f.source_column.as_deref() == Some(key.as_str()) || f.name == snake_case(key)
                })
                .ok_or_else(|| {
                    LoadError::config(format!("key column '{key}' not found in sampled data"))
                })?;
            field.primary_key = true;
            field.allow_null = false;
            key_names.push(field.name.clone());
        }
        indexes.push(Index::unique(key_names));
    }

    let table_name = SqlNamer::new().sql_name_with_prefix(&options.table_name, "table");
    let model = Model {
        model_name: camel_case(&table_name),
        table_name,
        fields,
        indexes,
    };

    debug!(
        table = %model.table_name,
        fields = model.fields.len(),
        indexes = model.indexes.len(),
        sample_rows = sample.len(),
        "inferred model"
    );
    Ok(model)
}

fn is_declared_key(column: &str, keys: &[String]) -> bool {
    keys.iter().any(|k| k == column || snake_case(k) == snake_case(column))
}

/// Decide the storage type for one column from its sampled values.
///
/// `is_key` disables identifier demotion: a declared key column keeps its inferred type.
pub fn column_type(
    values: &[&RawValue],
    column_name: &str,
    classify_options: &ClassifyOptions,
    is_key: bool,
) -> FieldType {
    let mut tally: Vec<(TypeTag, usize)> = Vec::new();
    let mut max_len = 0usize;

    for raw in values {
        let Some(value) = normalize(raw) else { continue };
        let len = rendered_len(&value);
        if len == 0 {
            continue;
        }
        max_len = max_len.max(len);

        let tag = classify(&value, classify_options);
        match tally.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, count)) => *count += 1,
            None => tally.push((tag, 1)),
        }
    }

    let Some(tag) = dominant_tag(&tally) else {
        return FieldType::String { width: None };
    };

    match tag {
        TypeTag::String if max_len * 2 < STRING_WIDTH_LIMIT => FieldType::String {
            width: Some((max_len * 2).max(2)),
        },
        TypeTag::String | TypeTag::Text => FieldType::Text,
        TypeTag::Integer | TypeTag::Float if !is_key && KNOWN_IDENTIFIER.is_match(column_name) => {
            FieldType::String {
                width: Some(max_len * 2),
            }
        }
        TypeTag::Integer if max_len > BIG_INTEGER_DIGITS => FieldType::BigInteger,
        TypeTag::Integer => FieldType::Integer,
        TypeTag::Float => FieldType::Float,
        TypeTag::Boolean => FieldType::Boolean,
        TypeTag::Date => FieldType::Date,
        TypeTag::DateTime => FieldType::DateTime,
    }
}

// A single tag wins outright; integer + float widens to float; otherwise the most frequent tag,
// ties going to the one seen first in the sample.
fn dominant_tag(tally: &[(TypeTag, usize)]) -> Option<TypeTag> {
    if tally.len() == 1 {
        return Some(tally[0].0);
    }
    let has = |tag: TypeTag| tally.iter().any(|(t, _)| *t == tag);
    if has(TypeTag::Integer) && has(TypeTag::Float) {
        return Some(TypeTag::Float);
    }

    let mut best: Option<(TypeTag, usize)> = None;
    for &(tag, count) in tally {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((tag, count));
        }
    }
    best.map(|(tag, _)| tag)
}
