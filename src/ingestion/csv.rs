//! CSV/TSV extraction.

use std::io::Read;

use crate::error::{LoadError, LoadResult};
use crate::types::{RawValue, Row};

use super::source::{FormatOptions, RowSource};

/// Streams CSV records as [`Row`]s of string values.
///
/// Rules:
///
/// - Column names come from the header line, from explicit `headers`, or are generated as
///   `column_1`, `column_2`, ... when the input has neither.
/// - Records may be shorter or longer than the header. Missing cells are simply absent from the
///   row; cells beyond the last named column are dropped.
pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    generate_headers: bool,
    options: FormatOptions,
    record: csv::StringRecord,
}

impl<R: Read> CsvRowSource<R> {
    pub fn new(input: R, options: &FormatOptions) -> LoadResult<Self> {
        let explicit = options.headers.clone();
        let has_headers = explicit.is_none() && options.has_headers;

        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(has_headers).flexible(true);
        if let Some(d) = options.delimiter {
            builder.delimiter(ascii_byte(d, "delimiter")?);
        }
        if let Some(q) = options.quote {
            builder.quote(ascii_byte(q, "quote")?);
        }
        let mut reader = builder.from_reader(input);

        let (headers, generate_headers) = match explicit {
            Some(names) => (names, false),
            None if has_headers => (reader.headers()?.iter().map(str::to_string).collect(), false),
            None => (Vec::new(), true),
        };

        Ok(Self {
            reader,
            headers,
            generate_headers,
            options: options.clone(),
            record: csv::StringRecord::new(),
        })
    }

    /// Column names in effect.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn column_name(&self, idx: usize) -> Option<String> {
        match self.headers.get(idx) {
            Some(name) if !name.trim().is_empty() => Some(name.clone()),
            Some(_) => Some(format!("column_{}", idx + 1)),
            None if self.generate_headers => Some(format!("column_{}", idx + 1)),
            None => None,
        }
    }
}

fn ascii_byte(c: char, what: &str) -> LoadResult<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            LoadError::config(format!("csv {what} must be a single ASCII character, got '{c}'"))
        })
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn next_row(&mut self) -> LoadResult<Option<Row>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }

        let mut row = Row::new();
        for (idx, cell) in self.record.iter().enumerate() {
            if let Some(name) = self.column_name(idx) {
                row.insert(name, RawValue::String(cell.to_string()));
            }
        }
        Ok(Some(row))
    }

    fn byte_offset(&self) -> u64 {
        self.reader.position().byte()
    }

    fn format_state(&self) -> FormatOptions {
        // The header line (if any) is behind us; the tail needs the names spelled out.
        let headers = if self.generate_headers && self.headers.is_empty() {
            None
        } else {
            Some(self.headers.clone())
        };
        FormatOptions {
            has_headers: false,
            headers,
            ..self.options.clone()
        }
    }
}
