//! `tables-load` streams tabular data (CSV, TSV, NDJSON, JSON arrays) from a file or pipe into a
//! SQL database.
//!
//! When no model is supplied, a bounded sample of rows is used to infer a table schema: column
//! types and widths, which columns to index, and the primary key. The sampled bytes are then
//! replayed in front of the rest of the stream, and every row is loaded in batched upserts with
//! pause/resume backpressure and resumable byte-offset checkpoints.
//!
//! The primary entrypoint is [`execution::LoadPipeline`], configured by [`config::LoadOptions`].
//!
//! ## Quick example: load a CSV into SQLite
//!
//! ```no_run
//! use tables_load::checkpoint::FileCheckpointStore;
//! use tables_load::config::LoadOptions;
//! use tables_load::execution::LoadPipeline;
//! use tables_load::storage::SqliteStorage;
//!
//! # fn main() -> Result<(), tables_load::LoadError> {
//! let options = LoadOptions {
//!     input: Some("people.csv".into()),
//!     db: Some("sqlite://people.sqlite".to_string()),
//!     key: vec!["id".to_string()],
//!     ..LoadOptions::default()
//! };
//! let storage = SqliteStorage::new(options.effective_db_uri()?);
//! let checkpoints = FileCheckpointStore::new(options.checkpoint_dir());
//!
//! let summary = LoadPipeline::new(options, storage)
//!     .with_checkpoints(Box::new(checkpoints))
//!     .run()?;
//! println!("{}", summary.metrics);
//! # Ok(())
//! # }
//! ```
//!
//! ## Inference only
//!
//! ```rust
//! use serde_json::json;
//! use tables_load::inference::{infer_model, InferenceOptions};
//! use tables_load::types::{FieldType, Row};
//!
//! let rows: Vec<Row> = [json!({"a": "1", "b": "x"}), json!({"a": "2", "b": "y"})]
//!     .into_iter()
//!     .filter_map(|v| v.as_object().cloned())
//!     .collect();
//! let options = InferenceOptions {
//!     table_name: "demo".to_string(),
//!     ..InferenceOptions::default()
//! };
//! let model = infer_model(&rows, &options).unwrap();
//!
//! assert_eq!(model.fields.len(), 3);
//! assert_eq!(model.field("a").unwrap().field_type, FieldType::Integer);
//! ```
//!
//! ## Modules
//!
//! - [`inference`]: value normalization, type classification, schema inference
//! - [`ingestion`]: row sources per format and replay of the sampled prefix
//! - [`processing`]: routing rows to model fields with per-type coercion
//! - [`execution`]: the batch load pipeline, backpressure, observers, metrics
//! - [`storage`]: the storage adapter trait and the SQLite backend
//! - [`checkpoint`]: resume checkpoints
//! - [`config`]: load options
//! - [`naming`]: SQL-safe identifiers
//! - [`types`]: models, fields, rows, and typed values
//! - [`error`]: the crate error type

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod execution;
pub mod inference;
pub mod ingestion;
pub mod naming;
pub mod processing;
pub mod storage;
pub mod types;

pub use error::{LoadError, LoadResult};
