use thiserror::Error;

/// Convenience result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type returned by the loader.
///
/// A single enum shared by configuration, extraction, inference, and storage. Row-level problems
/// (an unparseable value, a row the transformer rejects) are never reported through this type;
/// they are counted as skipped rows instead.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Options are invalid. Detected before any stream or connection is opened.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Underlying I/O error (missing file, broken pipe, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV extraction error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON extraction or checkpoint (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A statement failed against the storage backend.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The storage backend could not be reached.
    #[error("could not connect to '{uri}': {message}")]
    Connection { uri: String, message: String },

    /// The input stream failed or was used out of order.
    #[error("stream error: {message}")]
    Stream { message: String },

    /// The post-load hook reported a failure.
    #[error("finish hook failed: {message}")]
    Hook { message: String },

    /// A user supplied index pattern is not a valid regular expression.
    #[error("invalid index pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// `overwrite` was requested without the explicit confirmation flag.
    #[error("overwrite requested without explicit confirmation (set `confirm_overwrite` / pass --yes)")]
    OverwriteNotConfirmed,
}

impl LoadError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }
}
