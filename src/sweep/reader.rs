use crate::sweep::schema::{quote_identifier, validate_identifier};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

/// A read-only view of the result database for export.
///
/// Opens a separate read-only SQLite connection so that an export can run
/// while a sweep is writing (WAL mode allows this).
pub struct ResultReader {
    conn: Connection,
}

impl ResultReader {
    /// Open a read-only connection to the result database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening result db read-only: {}", db_path.display()))?;
        Ok(Self { conn })
    }

    /// Rows of `table` in insertion order, one JSON object per row.
    pub fn export_rows(&self, table: &str, limit: Option<usize>) -> Result<Vec<Map<String, JsonValue>>> {
        export_rows(&self.conn, table, limit)
    }
}

pub(crate) fn export_rows(
    conn: &Connection,
    table: &str,
    limit: Option<usize>,
) -> Result<Vec<Map<String, JsonValue>>> {
    validate_identifier(table)?;
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT * FROM {} ORDER BY rowid ASC LIMIT ?1",
            quote_identifier(table)
        ))
        .with_context(|| format!("querying {table}"))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map([limit], |row| {
        let mut object = Map::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            object.insert(name.clone(), to_json(row.get::<_, Value>(i)?));
        }
        Ok(object)
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(v) => JsonValue::from(v),
        Value::Real(v) => JsonValue::from(v),
        Value::Text(v) => JsonValue::from(v),
        Value::Blob(v) => JsonValue::from(v),
    }
}
