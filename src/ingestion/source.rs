//! Row sources: the extractor side of the pipeline.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};
use crate::types::Row;

use super::csv::CsvRowSource;
use super::json::{JsonArrayRowSource, NdjsonRowSource};

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Comma-separated values (delimiter and quote configurable).
    #[default]
    Csv,
    /// Tab-separated values.
    Tsv,
    /// A top-level JSON array of objects.
    Json,
    /// Newline-delimited JSON objects.
    Ndjson,
}

impl InputFormat {
    /// Parse an input format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "tsv" | "tab" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            _ => None,
        }
    }

    /// Detect the format from a path's extension, defaulting to CSV.
    pub fn detect(path: &Path) -> Self {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
            .unwrap_or_default()
    }

    /// Whether row boundaries line up with byte offsets, so a load can restart mid-file.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Json)
    }
}

impl FromStr for InputFormat {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| {
            LoadError::config(format!("unknown format '{s}' (expected csv, tsv, json, or ndjson)"))
        })
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::Ndjson => "ndjson",
        };
        f.write_str(s)
    }
}

/// Extractor options. Persisted with checkpoints so a resumed run parses the tail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Field delimiter. Defaults to `,` (CSV) or tab (TSV).
    pub delimiter: Option<char>,
    /// Quote character. Defaults to `"`.
    pub quote: Option<char>,
    /// Whether the first record holds column names. Ignored when `headers` is set.
    pub has_headers: bool,
    /// Explicit column names; the input is then treated as having no header line.
    pub headers: Option<Vec<String>>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            quote: None,
            has_headers: true,
            headers: None,
        }
    }
}

/// A stream of extracted rows.
pub trait RowSource {
    /// Next row, or `None` at end of input.
    fn next_row(&mut self) -> LoadResult<Option<Row>>;

    /// Bytes of the underlying stream covered by the rows returned so far.
    fn byte_offset(&self) -> u64;

    /// Options that parse the remainder of this stream from [`Self::byte_offset`] onward.
    fn format_state(&self) -> FormatOptions;
}

impl<S: RowSource + ?Sized> RowSource for Box<S> {
    fn next_row(&mut self) -> LoadResult<Option<Row>> {
        (**self).next_row()
    }

    fn byte_offset(&self) -> u64 {
        (**self).byte_offset()
    }

    fn format_state(&self) -> FormatOptions {
        (**self).format_state()
    }
}

/// Open the extractor for `format` over `reader`.
pub fn open_source<'a>(
    format: InputFormat,
    options: &FormatOptions,
    reader: Box<dyn Read + 'a>,
) -> LoadResult<Box<dyn RowSource + 'a>> {
    Ok(match format {
        InputFormat::Csv => Box::new(CsvRowSource::new(reader, options)?),
        InputFormat::Tsv => {
            let options = FormatOptions {
                delimiter: Some(options.delimiter.unwrap_or('\t')),
                ..options.clone()
            };
            Box::new(CsvRowSource::new(reader, &options)?)
        }
        InputFormat::Ndjson => Box::new(NdjsonRowSource::new(reader, options)),
        InputFormat::Json => Box::new(JsonArrayRowSource::new(reader, options)),
    })
}
