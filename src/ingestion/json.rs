//! JSON extraction.
//!
//! Supported inputs:
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`, streamed line by line
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`, read whole on the first pull

use std::io::{BufRead, BufReader, Read};

use tracing::warn;

use crate::error::LoadResult;
use crate::types::{RawValue, Row};

use super::source::{FormatOptions, RowSource};

/// Streams one object per line.
///
/// Blank lines are ignored. Lines that are not a JSON object are skipped with a warning; they
/// are row-level problems and do not stop the stream.
pub struct NdjsonRowSource<R: Read> {
    reader: BufReader<R>,
    options: FormatOptions,
    offset: u64,
    line_no: u64,
    malformed: u64,
    line: String,
}

impl<R: Read> NdjsonRowSource<R> {
    pub fn new(input: R, options: &FormatOptions) -> Self {
        Self {
            reader: BufReader::new(input),
            options: options.clone(),
            offset: 0,
            line_no: 0,
            malformed: 0,
            line: String::new(),
        }
    }

    /// Number of lines skipped because they were not JSON objects.
    pub fn malformed_lines(&self) -> u64 {
        self.malformed
    }
}

impl<R: Read> RowSource for NdjsonRowSource<R> {
    fn next_row(&mut self) -> LoadResult<Option<Row>> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line)?;
            if n == 0 {
                return Ok(None);
            }
            self.offset += n as u64;
            self.line_no += 1;

            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawValue>(text) {
                Ok(RawValue::Object(row)) => return Ok(Some(row)),
                Ok(_) => {
                    self.malformed += 1;
                    warn!(line = self.line_no, "skipping ndjson line: not an object");
                }
                Err(e) => {
                    self.malformed += 1;
                    warn!(line = self.line_no, error = %e, "skipping invalid ndjson line");
                }
            }
        }
    }

    fn byte_offset(&self) -> u64 {
        self.offset
    }

    fn format_state(&self) -> FormatOptions {
        self.options.clone()
    }
}

/// Reads a top-level JSON array (or a single object) and yields its object elements.
///
/// Byte offsets are only meaningful once the whole document has been read; this format cannot
/// be resumed mid-file.
pub struct JsonArrayRowSource<R: Read> {
    input: Option<R>,
    options: FormatOptions,
    rows: std::vec::IntoIter<RawValue>,
    bytes: u64,
}

impl<R: Read> JsonArrayRowSource<R> {
    pub fn new(input: R, options: &FormatOptions) -> Self {
        Self {
            input: Some(input),
            options: options.clone(),
            rows: Vec::new().into_iter(),
            bytes: 0,
        }
    }

    fn fill(&mut self, mut input: R) -> LoadResult<()> {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        self.bytes = buf.len() as u64;

        if buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let items = match serde_json::from_slice::<RawValue>(&buf)? {
            RawValue::Array(items) => items,
            obj @ RawValue::Object(_) => vec![obj],
            _ => {
                warn!("json input is neither an array nor an object; no rows extracted");
                Vec::new()
            }
        };
        self.rows = items.into_iter();
        Ok(())
    }
}

impl<R: Read> RowSource for JsonArrayRowSource<R> {
    fn next_row(&mut self) -> LoadResult<Option<Row>> {
        if let Some(input) = self.input.take() {
            self.fill(input)?;
        }
        for item in self.rows.by_ref() {
            match item {
                RawValue::Object(row) => return Ok(Some(row)),
                _ => warn!("skipping json array element: not an object"),
            }
        }
        Ok(None)
    }

    fn byte_offset(&self) -> u64 {
        self.bytes
    }

    fn format_state(&self) -> FormatOptions {
        self.options.clone()
    }
}
