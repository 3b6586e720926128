//! Extraction: turning an input byte stream into rows.
//!
//! - [`source`]: the [`RowSource`] trait, [`InputFormat`] detection, and [`open_source`]
//! - [`csv`]: CSV/TSV rows via the `csv` crate
//! - [`json`]: NDJSON (streamed) and JSON arrays (read whole)
//! - [`reconcile`]: replay the bytes consumed while sampling in front of the live stream

pub mod csv;
pub mod json;
pub mod reconcile;
pub mod source;

pub use reconcile::{ReconciledStream, SampleTap, reconcile};
pub use source::{FormatOptions, InputFormat, RowSource, open_source};
