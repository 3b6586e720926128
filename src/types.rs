//! Core data model types for loading.
//!
//! Rows arrive from a [`crate::ingestion::RowSource`] as untyped [`Row`] objects, are described
//! by a [`Model`] (a list of typed [`Field`]s plus indexes), and leave the transformer as typed
//! [`Record`]s ready for a bulk upsert.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A raw scalar, array, or object value as emitted by a row source.
pub type RawValue = serde_json::Value;

/// One extracted row: source column name to raw value, in source column order.
pub type Row = serde_json::Map<String, RawValue>;

/// Name of the synthetic auto-increment key added when no key is declared.
pub const SYNTHETIC_KEY_NAME: &str = "tables_primary_key";

/// Storage type of a modeled field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FieldType {
    /// 32-bit range integer.
    Integer,
    /// 64-bit integer, used for long integer columns.
    BigInteger,
    /// Floating point number.
    Float,
    /// Boolean.
    Boolean,
    /// Calendar date without time.
    Date,
    /// Date and time without zone.
    DateTime,
    /// Bounded string. `width: None` means the backend's default capacity.
    String { width: Option<usize> },
    /// Unbounded text.
    Text,
}

impl FieldType {
    /// String capacity, present only for [`FieldType::String`].
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::String { width } => *width,
            _ => None,
        }
    }
}

/// A single modeled column of a [`Model`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Raw column label from the input. `None` for synthetic fields.
    pub source_column: Option<String>,
    /// SQL-safe target column name.
    pub name: String,
    /// Storage type.
    pub field_type: FieldType,
    pub primary_key: bool,
    pub allow_null: bool,
    pub auto_increment: bool,
}

impl Field {
    /// Create a nullable, non-key field sourced from `source_column`.
    pub fn new(
        source_column: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            source_column: Some(source_column.into()),
            name: name.into(),
            field_type,
            primary_key: false,
            allow_null: true,
            auto_increment: false,
        }
    }

    /// The synthetic auto-increment integer primary key.
    pub fn synthetic_key() -> Self {
        Self {
            source_column: None,
            name: SYNTHETIC_KEY_NAME.to_string(),
            field_type: FieldType::Integer,
            primary_key: true,
            allow_null: false,
            auto_increment: true,
        }
    }

    /// Mark this field as (part of) the primary key.
    pub fn into_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }
}

/// An index over one or more target field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub fields: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn single(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            unique: false,
        }
    }

    pub fn unique(fields: Vec<String>) -> Self {
        Self { fields, unique: true }
    }
}

/// Relational schema for one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// camelCase name of the entity.
    pub model_name: String,
    /// snake_case SQL table name of the same entity.
    pub table_name: String,
    /// Ordered fields. Primary key field(s) appear exactly once.
    pub fields: Vec<Field>,
    pub indexes: Vec<Index>,
}

impl Model {
    /// Create a model with no indexes.
    pub fn new(
        model_name: impl Into<String>,
        table_name: impl Into<String>,
        fields: Vec<Field>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            table_name: table_name.into(),
            fields,
            indexes: Vec::new(),
        }
    }

    /// Iterate target field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Look up a field by target name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by the input column it is sourced from.
    pub fn field_by_source(&self, column: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.source_column.as_deref() == Some(column))
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// Whether the primary key is the synthetic auto-increment field.
    pub fn has_synthetic_key(&self) -> bool {
        self.fields.iter().any(|f| f.primary_key && f.auto_increment)
    }
}

/// A single typed value, ready to be written to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Utf8(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One typed row for a single model: target field name to value, in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing a previous value for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}
