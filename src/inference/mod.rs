//! Schema inference.
//!
//! - [`normalize`]: canonicalize raw values (trim, empty sentinels)
//! - [`classify`]: classify one value into a [`TypeTag`]
//! - [`model`]: derive a [`crate::types::Model`] from a sample of rows

pub mod classify;
pub mod model;
pub mod normalize;

pub use classify::{ClassifyOptions, TypeTag, classify};
pub use model::{IndexPattern, InferenceOptions, column_type, infer_model, should_index};
pub use normalize::{EMPTY_SENTINELS, normalize};
