//! Row transformation between extraction and loading.
//!
//! - [`transform`]: route a raw [`crate::types::Row`] to per-model [`crate::types::Record`]s
//! - [`parse`]: coerce each raw value into the type of the field it lands in
//!
//! ## Example
//!
//! ```rust
//! use tables_load::inference::ClassifyOptions;
//! use tables_load::processing::FieldRouter;
//! use tables_load::types::{Field, FieldType, Model, Row, Value};
//!
//! let model = Model::new(
//!     "people",
//!     "people",
//!     vec![
//!         Field::synthetic_key(),
//!         Field::new("Age", "age", FieldType::Integer),
//!     ],
//! );
//! let router = FieldRouter::new(std::slice::from_ref(&model), ClassifyOptions::default());
//!
//! let mut row = Row::new();
//! row.insert("Age".to_string(), serde_json::json!("1,024"));
//!
//! let routed = router.route(&row).unwrap();
//! assert_eq!(routed[0].1.get("age"), Some(&Value::Int64(1024)));
//! ```

pub mod parse;
pub mod transform;

pub use parse::parse_value;
pub use transform::{FieldRouter, RoutedRow};
