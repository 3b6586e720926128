//! Load configuration.
//!
//! [`LoadOptions`] is the single explicit configuration struct handed to the pipeline. It can be
//! built in code (`..LoadOptions::default()`), deserialized from a JSON file, or assembled by the
//! `tables` binary from command-line flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::{LoadError, LoadResult};
use crate::inference::{ClassifyOptions, IndexPattern, InferenceOptions};
use crate::ingestion::{FormatOptions, InputFormat};
use crate::storage::DatabaseUri;

/// Environment variable consulted when no database URI is given.
pub const DB_URI_ENV: &str = "TABLES_DB_URI";

/// Table name used when neither a name nor an input file is given.
pub const DEFAULT_TABLE_NAME: &str = "tables_auto_import";

/// Directory name (under `$HOME`) for resume checkpoints.
pub const DEFAULT_DATA_DIR: &str = ".tables-data";

/// Options for one load run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadOptions {
    /// Input file. `None` reads standard input.
    pub input: Option<PathBuf>,
    /// Database URI, e.g. `sqlite://out.sqlite`.
    pub db: Option<String>,
    /// Target table. Defaults to the input file stem.
    pub table_name: Option<String>,
    /// Input format. Defaults to detection from the input extension.
    pub format: Option<InputFormat>,
    pub format_options: FormatOptions,

    /// Checkpoint key for this stream. Defaults to the input path.
    pub id: Option<String>,
    /// Resume from a saved checkpoint when one exists.
    pub resume: bool,
    /// Checkpoint directory. Defaults to `$HOME/.tables-data`.
    pub checkpoint_path: Option<PathBuf>,

    /// Rows sampled for inference.
    pub guess_limit: usize,
    /// Rows per flush.
    pub batch_threshold: usize,
    /// chrono `strftime` patterns for dates; a single string or a list.
    #[serde(deserialize_with = "string_or_list")]
    pub date_format: Vec<String>,
    /// chrono `strftime` patterns for datetimes; a single string or a list.
    #[serde(deserialize_with = "string_or_list")]
    pub datetime_format: Vec<String>,
    /// Declared key columns. Empty = synthetic auto-increment key.
    #[serde(deserialize_with = "string_or_list")]
    pub key: Vec<String>,
    /// Index pattern: `/regex/` or a comma-separated list of column names.
    pub fields_to_index: Option<String>,

    pub use_transactions: bool,
    pub optimize_after_load: bool,
    /// Drop and recreate target tables.
    pub overwrite: bool,
    pub require_explicit_overwrite_confirmation: bool,
    /// Explicit confirmation for `overwrite`.
    pub confirm_overwrite: bool,

    /// Suppress status output (the binary's stderr observer).
    pub silent: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            input: None,
            db: None,
            table_name: None,
            format: None,
            format_options: FormatOptions::default(),
            id: None,
            resume: true,
            checkpoint_path: None,
            guess_limit: 300,
            batch_threshold: 500,
            date_format: vec!["%m/%d/%Y".to_string(), "%Y-%m-%d".to_string()],
            datetime_format: vec![
                "%m/%d/%Y %I:%M:%S %p".to_string(),
                "%m/%d/%Y %H:%M:%S".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
            ],
            key: Vec::new(),
            fields_to_index: None,
            use_transactions: true,
            optimize_after_load: true,
            overwrite: false,
            require_explicit_overwrite_confirmation: true,
            confirm_overwrite: false,
            silent: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => vec![s],
        StringOrList::Many(v) => v,
    })
}

impl LoadOptions {
    /// Read options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> LoadResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Check everything that can be checked before a stream or connection is opened.
    pub fn validate(&self) -> LoadResult<()> {
        if let Some(input) = &self.input {
            if !input.is_file() {
                return Err(LoadError::config(format!(
                    "input file '{}' does not exist",
                    input.display()
                )));
            }
        }
        if self.guess_limit == 0 {
            return Err(LoadError::config("guess_limit must be > 0"));
        }
        if self.batch_threshold == 0 {
            return Err(LoadError::config("batch_threshold must be > 0"));
        }
        if self.key.iter().any(|k| k.trim().is_empty()) {
            return Err(LoadError::config("key column names must not be empty"));
        }
        if self
            .date_format
            .iter()
            .chain(&self.datetime_format)
            .any(|f| f.trim().is_empty())
        {
            return Err(LoadError::config("date/datetime formats must not be empty"));
        }
        self.index_pattern()?;
        self.effective_db_uri()?;

        if self.overwrite
            && self.require_explicit_overwrite_confirmation
            && !self.confirm_overwrite
        {
            return Err(LoadError::OverwriteNotConfirmed);
        }
        Ok(())
    }

    /// Format in effect: explicit, else detected from the input extension, else CSV.
    pub fn effective_format(&self) -> InputFormat {
        self.format
            .or_else(|| self.input.as_deref().map(InputFormat::detect))
            .unwrap_or_default()
    }

    /// Database URI: explicit, else `$TABLES_DB_URI`, else a SQLite file named after the input.
    pub fn effective_db_uri(&self) -> LoadResult<DatabaseUri> {
        self.db_uri_with_env(env::var(DB_URI_ENV).ok())
    }

    fn db_uri_with_env(&self, from_env: Option<String>) -> LoadResult<DatabaseUri> {
        if let Some(uri) = self.db.as_ref().or(from_env.as_ref()) {
            return uri.parse();
        }
        let file = match self.input_stem() {
            Some(stem) => format!("{stem}.sqlite"),
            None => "tables-import.sqlite".to_string(),
        };
        Ok(DatabaseUri::sqlite_file(file))
    }

    /// Raw table name (normalized to a SQL identifier during inference).
    pub fn effective_table_name(&self) -> String {
        self.table_name
            .clone()
            .or_else(|| self.input_stem())
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string())
    }

    /// Checkpoint key of this stream.
    pub fn stream_id(&self) -> String {
        match (&self.id, &self.input) {
            (Some(id), _) => id.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "stdin".to_string(),
        }
    }

    /// Directory holding resume checkpoints.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_path.clone().unwrap_or_else(|| {
            env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR)
        })
    }

    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            date_formats: self.date_format.clone(),
            datetime_formats: self.datetime_format.clone(),
        }
    }

    pub fn index_pattern(&self) -> LoadResult<IndexPattern> {
        match self.fields_to_index.as_deref().map(str::trim) {
            None | Some("") => Ok(IndexPattern::Default),
            Some(p) => IndexPattern::from_cli(p),
        }
    }

    pub fn inference_options(&self) -> LoadResult<InferenceOptions> {
        Ok(InferenceOptions {
            table_name: self.effective_table_name(),
            classify: self.classify_options(),
            index_pattern: self.index_pattern()?,
            key: self.key.clone(),
        })
    }

    fn input_stem(&self) -> Option<String> {
        self.input
            .as_deref()
            .and_then(Path::file_stem)
            .and_then(|s| s.to_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = LoadOptions::default();
        assert_eq!(o.guess_limit, 300);
        assert_eq!(o.batch_threshold, 500);
        assert!(o.use_transactions && o.optimize_after_load && o.resume);
        assert!(!o.overwrite);
        assert_eq!(o.effective_table_name(), DEFAULT_TABLE_NAME);
        assert_eq!(o.stream_id(), "stdin");
        assert_eq!(o.effective_format(), InputFormat::Csv);
    }

    #[test]
    fn names_and_uri_fall_back_to_input_stem() {
        let o = LoadOptions {
            input: Some(PathBuf::from("data/people.ndjson")),
            ..LoadOptions::default()
        };
        assert_eq!(o.effective_table_name(), "people");
        assert_eq!(o.effective_format(), InputFormat::Ndjson);
        assert_eq!(o.stream_id(), "data/people.ndjson");
        assert_eq!(
            o.db_uri_with_env(None).unwrap(),
            DatabaseUri::sqlite_file("people.sqlite")
        );
        assert_eq!(
            o.db_uri_with_env(Some("sqlite://:memory:".to_string())).unwrap(),
            DatabaseUri::SqliteMemory
        );
        assert_eq!(
            LoadOptions::default().db_uri_with_env(None).unwrap(),
            DatabaseUri::sqlite_file("tables-import.sqlite")
        );
    }

    #[test]
    fn deserializes_string_or_list_formats() {
        let o: LoadOptions = serde_json::from_str(
            r#"{"date_format": "%d.%m.%Y", "key": ["id"], "batch_threshold": 10, "format": "tsv"}"#,
        )
        .unwrap();
        assert_eq!(o.date_format, vec!["%d.%m.%Y"]);
        assert_eq!(o.key, vec!["id"]);
        assert_eq!(o.batch_threshold, 10);
        assert_eq!(o.format, Some(InputFormat::Tsv));
        assert_eq!(o.guess_limit, 300);

        assert!(serde_json::from_str::<LoadOptions>(r#"{"nope": 1}"#).is_err());
    }

    #[test]
    fn validation_catches_bad_options_early() {
        let bad = [
            LoadOptions {
                input: Some(PathBuf::from("/definitely/not/here.csv")),
                ..LoadOptions::default()
            },
            LoadOptions {
                batch_threshold: 0,
                ..LoadOptions::default()
            },
            LoadOptions {
                key: vec![" ".to_string()],
                ..LoadOptions::default()
            },
            LoadOptions {
                fields_to_index: Some("/(oops/".to_string()),
                ..LoadOptions::default()
            },
            LoadOptions {
                db: Some("postgres://localhost/x".to_string()),
                ..LoadOptions::default()
            },
        ];
        for o in &bad {
            assert!(o.validate().is_err(), "{o:?}");
        }
        assert!(LoadOptions {
            db: Some("sqlite://:memory:".to_string()),
            ..LoadOptions::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn overwrite_requires_confirmation() {
        let mut o = LoadOptions {
            db: Some("sqlite://:memory:".to_string()),
            overwrite: true,
            ..LoadOptions::default()
        };
        assert!(matches!(o.validate(), Err(LoadError::OverwriteNotConfirmed)));

        o.confirm_overwrite = true;
        assert!(o.validate().is_ok());

        o.confirm_overwrite = false;
        o.require_explicit_overwrite_confirmation = false;
        assert!(o.validate().is_ok());
    }
}
