//! Storage backends: schema sync and bulk upserts.
//!
//! The pipeline only talks to [`StorageAdapter`]; SQL generation belongs to the adapter, not to
//! the [`Model`].

pub mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{LoadError, LoadResult};
use crate::types::{Model, Record};

pub use sqlite::SqliteStorage;

/// Options for a single [`StorageAdapter::bulk_upsert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Wrap the whole call in one transaction (rolled back on any failure).
    pub use_transactions: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            use_transactions: true,
        }
    }
}

/// A database the pipeline can load into.
pub trait StorageAdapter {
    /// Open the connection.
    fn connect(&mut self) -> LoadResult<()>;

    /// Create missing tables, columns, and indexes. With `overwrite`, existing tables are
    /// dropped first.
    fn sync_schema(&mut self, models: &[Model], overwrite: bool) -> LoadResult<()>;

    /// Insert or replace `rows` in `model`'s table, keyed by its primary key.
    ///
    /// Upserting the same keyed rows twice must not duplicate them. Failures are errors; there is
    /// no partial success.
    fn bulk_upsert(
        &mut self,
        rows: &[Record],
        model: &Model,
        options: &UpsertOptions,
    ) -> LoadResult<()>;

    /// Reclaim space and refresh planner statistics for `model`'s table.
    fn optimize(&mut self, model: &Model) -> LoadResult<()>;

    /// Run raw SQL statements. Used by post-load hooks.
    fn execute_batch(&mut self, sql: &str) -> LoadResult<()>;

    /// Close the connection. Closing twice is not an error.
    fn close(&mut self) -> LoadResult<()>;

    /// Human readable target, for logs.
    fn describe(&self) -> String;
}

/// A parsed database URI. Only SQLite is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUri {
    /// `sqlite://:memory:`
    SqliteMemory,
    /// `sqlite://relative/path.sqlite` or `sqlite:///absolute/path.sqlite`
    SqliteFile(PathBuf),
}

impl DatabaseUri {
    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        Self::SqliteFile(path.into())
    }
}

impl FromStr for DatabaseUri {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| LoadError::config(format!("database uri '{s}' has no protocol")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => {
                let path = rest.strip_prefix("//").unwrap_or(rest);
                match path {
                    "" => Err(LoadError::config(format!("database uri '{s}' has no path"))),
                    ":memory:" => Ok(Self::SqliteMemory),
                    p => Ok(Self::SqliteFile(PathBuf::from(p))),
                }
            }
            other => Err(LoadError::config(format!(
                "unsupported database protocol '{other}' (only sqlite:// is supported)"
            ))),
        }
    }
}

impl fmt::Display for DatabaseUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqliteMemory => f.write_str("sqlite://:memory:"),
            Self::SqliteFile(p) => write!(f, "sqlite://{}", p.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_uris() {
        assert_eq!("sqlite://:memory:".parse::<DatabaseUri>().unwrap(), DatabaseUri::SqliteMemory);
        assert_eq!(
            "sqlite://data/out.sqlite".parse::<DatabaseUri>().unwrap(),
            DatabaseUri::sqlite_file("data/out.sqlite")
        );
        assert_eq!(
            "sqlite:///tmp/out.sqlite".parse::<DatabaseUri>().unwrap(),
            DatabaseUri::sqlite_file("/tmp/out.sqlite")
        );
        assert_eq!(
            DatabaseUri::sqlite_file("/tmp/out.sqlite").to_string(),
            "sqlite:///tmp/out.sqlite"
        );
    }

    #[test]
    fn other_protocols_are_config_errors() {
        for uri in ["postgres://localhost/db", "mysql://x", "no-protocol", "sqlite://"] {
            assert!(
                matches!(uri.parse::<DatabaseUri>(), Err(LoadError::Config { .. })),
                "{uri}"
            );
        }
    }
}
