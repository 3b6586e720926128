//! SQLite backend via `rusqlite`.

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info};

use crate::error::{LoadError, LoadResult};
use crate::types::{Field, FieldType, Index, Model, Record, Value};

use super::{DatabaseUri, StorageAdapter, UpsertOptions};

/// Capacity used for strings whose width was never measured.
const DEFAULT_VARCHAR_WIDTH: usize = 255;

#[derive(Debug)]
pub struct SqliteStorage {
    uri: DatabaseUri,
    conn: Option<Connection>,
}

impl SqliteStorage {
    pub fn new(uri: DatabaseUri) -> Self {
        Self { uri, conn: None }
    }

    pub fn in_memory() -> Self {
        Self::new(DatabaseUri::SqliteMemory)
    }

    /// The open connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Number of rows in `table`.
    pub fn count_rows(&self, table: &str) -> LoadResult<i64> {
        let conn = self.conn.as_ref().ok_or_else(|| self.not_connected())?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn not_connected(&self) -> LoadError {
        LoadError::Connection {
            uri: self.uri.to_string(),
            message: "not connected".to_string(),
        }
    }

    fn conn_mut(&mut self) -> LoadResult<&mut Connection> {
        match self.conn {
            Some(ref mut conn) => Ok(conn),
            None => Err(LoadError::Connection {
                uri: self.uri.to_string(),
                message: "not connected".to_string(),
            }),
        }
    }

    fn existing_columns(conn: &Connection, table: &str) -> LoadResult<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

impl StorageAdapter for SqliteStorage {
    fn connect(&mut self) -> LoadResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let opened = match &self.uri {
            DatabaseUri::SqliteMemory => Connection::open_in_memory(),
            DatabaseUri::SqliteFile(path) => Connection::open(path),
        };
        let conn = opened.map_err(|e| LoadError::Connection {
            uri: self.uri.to_string(),
            message: e.to_string(),
        })?;
        info!(db = %self.uri, "connected");
        self.conn = Some(conn);
        Ok(())
    }

    fn sync_schema(&mut self, models: &[Model], overwrite: bool) -> LoadResult<()> {
        let conn = self.conn_mut()?;
        for model in models {
            let table = quote_ident(&model.table_name);
            if overwrite {
                info!(table = %model.table_name, "dropping existing table");
                conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
            }
            conn.execute(&create_table_sql(model), [])?;

            let existing = Self::existing_columns(conn, &model.table_name)?;
            for field in &model.fields {
                if !existing.iter().any(|c| c.eq_ignore_ascii_case(&field.name)) {
                    debug!(table = %model.table_name, column = %field.name, "adding column");
                    conn.execute(
                        &format!("ALTER TABLE {table} ADD COLUMN {}", column_sql(field, false)),
                        [],
                    )?;
                }
            }

            for index in &model.indexes {
                conn.execute(&create_index_sql(&model.table_name, index), [])?;
            }
        }
        Ok(())
    }

    fn bulk_upsert(
        &mut self,
        rows: &[Record],
        model: &Model,
        options: &UpsertOptions,
    ) -> LoadResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let columns: Vec<&str> = model
            .fields
            .iter()
            .filter(|f| !f.auto_increment)
            .map(|f| f.name.as_str())
            .collect();
        let sql = upsert_sql(&model.table_name, &columns);
        let conn = self.conn_mut()?;

        if options.use_transactions {
            let tx = conn.transaction()?;
            write_rows(&tx, &sql, &columns, rows)?;
            tx.commit()?;
        } else {
            write_rows(conn, &sql, &columns, rows)?;
        }

        debug!(table = %model.table_name, rows = rows.len(), "upserted rows");
        Ok(())
    }

    fn optimize(&mut self, model: &Model) -> LoadResult<()> {
        let conn = self.conn_mut()?;
        conn.execute_batch("VACUUM")?;
        conn.execute_batch(&format!("ANALYZE {}", quote_ident(&model.table_name)))?;
        Ok(())
    }

    fn execute_batch(&mut self, sql: &str) -> LoadResult<()> {
        self.conn_mut()?.execute_batch(sql)?;
        Ok(())
    }

    fn close(&mut self) -> LoadResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            debug!(db = %self.uri, "connection closed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.uri.to_string()
    }
}

// `Transaction` derefs to `Connection`, so both paths share this.
fn write_rows(conn: &Connection, sql: &str, columns: &[&str], rows: &[Record]) -> LoadResult<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    for record in rows {
        let values = columns.iter().map(|c| record.get(c).unwrap_or(&Value::Null));
        stmt.execute(params_from_iter(values))?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType) -> String {
    match field_type {
        FieldType::Integer => "INTEGER".to_string(),
        FieldType::BigInteger => "BIGINT".to_string(),
        FieldType::Float => "REAL".to_string(),
        FieldType::Boolean => "BOOLEAN".to_string(),
        FieldType::Date => "DATE".to_string(),
        FieldType::DateTime => "DATETIME".to_string(),
        FieldType::String { width } => {
            format!("VARCHAR({})", width.unwrap_or(DEFAULT_VARCHAR_WIDTH))
        }
        FieldType::Text => "TEXT".to_string(),
    }
}

fn column_sql(field: &Field, with_constraints: bool) -> String {
    if with_constraints && field.auto_increment {
        return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(&field.name));
    }
    let mut sql = format!("{} {}", quote_ident(&field.name), sql_type(field.field_type));
    if with_constraints && !field.allow_null {
        sql.push_str(" NOT NULL");
    }
    sql
}

fn create_table_sql(model: &Model) -> String {
    let mut parts: Vec<String> = model.fields.iter().map(|f| column_sql(f, true)).collect();
    if !model.has_synthetic_key() {
        let key: Vec<String> = model.primary_key().map(|f| quote_ident(&f.name)).collect();
        if !key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", key.join(", ")));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&model.table_name),
        parts.join(", ")
    )
}

fn create_index_sql(table: &str, index: &Index) -> String {
    let name = format!("idx_{}_{}", table, index.fields.join("_"));
    let columns: Vec<String> = index.fields.iter().map(|f| quote_ident(f)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&name),
        quote_ident(table),
        columns.join(", ")
    )
}

fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Int64(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float64(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Utf8(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format("%Y-%m-%d").to_string())),
            Value::DateTime(dt) => {
                ToSqlOutput::Owned(SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_model() -> Model {
        let mut model = Model::new(
            "people",
            "people",
            vec![
                Field::new("Id", "id", FieldType::Integer).into_key(),
                Field::new("Name", "name", FieldType::String { width: Some(10) }),
            ],
        );
        model.indexes.push(Index::single("name"));
        model.indexes.push(Index::unique(vec!["id".to_string()]));
        model
    }

    fn rec(id: i64, name: &str) -> Record {
        [
            ("id".to_string(), Value::Int64(id)),
            ("name".to_string(), Value::Utf8(name.to_string())),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn ddl_for_declared_and_synthetic_keys() {
        let sql = create_table_sql(&keyed_model());
        assert_eq!(
            sql,
            r#"CREATE TABLE IF NOT EXISTS "people" ("id" INTEGER NOT NULL, "name" VARCHAR(10), PRIMARY KEY ("id"))"#
        );

        let synthetic = Model::new(
            "t",
            "t",
            vec![Field::synthetic_key(), Field::new("a", "a", FieldType::Text)],
        );
        assert_eq!(
            create_table_sql(&synthetic),
            r#"CREATE TABLE IF NOT EXISTS "t" ("tables_primary_key" INTEGER PRIMARY KEY AUTOINCREMENT, "a" TEXT)"#
        );
    }

    #[test]
    fn upsert_is_idempotent_on_primary_key() {
        let model = keyed_model();
        let mut db = SqliteStorage::in_memory();
        db.connect().unwrap();
        db.sync_schema(std::slice::from_ref(&model), false).unwrap();

        let rows = vec![rec(1, "a"), rec(2, "b")];
        db.bulk_upsert(&rows, &model, &UpsertOptions::default()).unwrap();
        db.bulk_upsert(&rows, &model, &UpsertOptions::default()).unwrap();
        assert_eq!(db.count_rows("people").unwrap(), 2);

        db.bulk_upsert(&[rec(2, "c")], &model, &UpsertOptions { use_transactions: false })
            .unwrap();
        let name: String = db
            .connection()
            .unwrap()
            .query_row("SELECT name FROM people WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "c");
    }

    #[test]
    fn failed_batch_rolls_back() {
        let model = Model::new(
            "codes",
            "codes",
            vec![
                Field::new("Code", "code", FieldType::String { width: Some(4) }).into_key(),
                Field::new("Id", "id", FieldType::Integer),
            ],
        );
        let mut db = SqliteStorage::in_memory();
        db.connect().unwrap();
        db.sync_schema(std::slice::from_ref(&model), false).unwrap();

        let mut good = Record::new();
        good.insert("code", Value::Utf8("ab".to_string()));
        let mut bad = Record::new();
        bad.insert("code", Value::Null);
        let err = db.bulk_upsert(&[good, bad], &model, &UpsertOptions::default());
        assert!(matches!(err, Err(LoadError::Storage(_))));
        assert_eq!(db.count_rows("codes").unwrap(), 0);
    }

    #[test]
    fn sync_adds_missing_columns_and_overwrite_drops() {
        let mut db = SqliteStorage::in_memory();
        db.connect().unwrap();
        let narrow = Model::new(
            "t",
            "t",
            vec![Field::synthetic_key(), Field::new("a", "a", FieldType::Integer)],
        );
        db.sync_schema(std::slice::from_ref(&narrow), false).unwrap();
        db.bulk_upsert(
            &[[("a".to_string(), Value::Int64(1))].into_iter().collect()],
            &narrow,
            &UpsertOptions::default(),
        )
        .unwrap();

        let mut wide = narrow.clone();
        wide.fields.push(Field::new("b", "b", FieldType::Boolean));
        db.sync_schema(std::slice::from_ref(&wide), false).unwrap();
        let cols = SqliteStorage::existing_columns(db.connection().unwrap(), "t").unwrap();
        assert_eq!(cols, vec!["tables_primary_key", "a", "b"]);
        assert_eq!(db.count_rows("t").unwrap(), 1);

        db.sync_schema(std::slice::from_ref(&wide), true).unwrap();
        assert_eq!(db.count_rows("t").unwrap(), 0);

        db.optimize(&wide).unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(db.count_rows("t").is_err());
    }

    #[test]
    fn unreachable_file_is_a_connection_error() {
        let mut db = SqliteStorage::new(DatabaseUri::sqlite_file("/nonexistent-dir/sub/x.sqlite"));
        assert!(matches!(db.connect(), Err(LoadError::Connection { .. })));
    }
}
