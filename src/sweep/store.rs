use crate::error::StoreError;
use crate::sweep::parser::BenchmarkMetrics;
use crate::sweep::schema::{
    self, quote_identifier, FieldValue, TableSchema, BATCH_SIZE_COLUMN, FOOTPRINT_COLUMN,
    THREAD_COUNT_COLUMN, TOP_COLUMN,
};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Conjunction of `column = value` terms used to address rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPredicate {
    terms: Vec<(String, FieldValue)>,
}

impl KeyPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: FieldValue) -> Self {
        self.terms.push((column.into(), value));
        self
    }

    pub fn terms(&self) -> &[(String, FieldValue)] {
        &self.terms
    }

    fn where_clause(&self) -> String {
        if self.terms.is_empty() {
            return "1 = 1".to_string();
        }
        self.terms
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", quote_identifier(col), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn params(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.terms
            .iter()
            .map(|(_, v)| v as &dyn rusqlite::ToSql)
            .collect()
    }
}

/// One measured row ready for insertion. The footprint is always written as 0
/// and patched later by the size update.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub algo_values: Vec<FieldValue>,
    pub case_values: Vec<FieldValue>,
    pub top: u32,
    pub batch_size: u32,
    pub thread_count: u32,
    pub metrics: BenchmarkMetrics,
}

impl ResultRecord {
    /// Values in the column order of [`TableSchema::columns`].
    pub fn values(&self) -> Vec<FieldValue> {
        let m = &self.metrics;
        let mut values: Vec<FieldValue> = self
            .algo_values
            .iter()
            .chain(self.case_values.iter())
            .cloned()
            .collect();
        values.extend(
            [self.top, self.batch_size, self.thread_count]
                .into_iter()
                .map(|v| FieldValue::Integer(i64::from(v))),
        );
        let scalars = [m.qps, m.cpu_util, m.mem_r_bw, m.mem_w_bw, 0.0];
        values.extend(scalars.into_iter().map(FieldValue::Real));
        for stats in [&m.latency, &m.recall] {
            values.extend(stats.values().into_iter().map(FieldValue::Real));
        }
        values
    }
}

/// Handle over the SQLite database holding benchmark result tables.
///
/// All access is synchronous from a single caller; errors from SQLite are
/// propagated with context and never retried.
pub struct ResultStore {
    conn: Connection,
    db_path: PathBuf,
}

impl ResultStore {
    /// Open (or create) the result database at `db_dir/db_file`.
    pub fn open(db_dir: &Path, db_file: &str) -> Result<Self> {
        std::fs::create_dir_all(db_dir)
            .with_context(|| format!("creating output dir: {}", db_dir.display()))?;

        let db_path = db_dir.join(db_file);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening result db: {}", db_path.display()))?;
        conn.execute_batch(schema::PRAGMAS)
            .context("result db PRAGMA setup")?;

        Ok(Self { conn, db_path })
    }

    /// Store that lives only as long as the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory result db")?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the underlying database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the table if it is absent. An existing table is reused as-is.
    pub fn ensure_schema(&self, schema: &TableSchema) -> Result<()> {
        self.conn
            .execute_batch(&schema.create_table_sql())
            .with_context(|| format!("{} DDL", schema.table))
    }

    /// Whether one row matches `predicate`. More than one match means the key
    /// invariant is already broken and is reported as an error.
    pub fn exists(&self, schema: &TableSchema, predicate: &KeyPredicate) -> Result<bool> {
        check_predicate(schema, predicate)?;
        let matches = self.count_matching(schema, predicate, None)?;
        match matches {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::DuplicateKey {
                table: schema.table.clone(),
                matches: n,
            }
            .into()),
        }
    }

    /// Append one row.
    pub fn insert(&self, schema: &TableSchema, record: &ResultRecord) -> Result<()> {
        let values = record.values();
        check_values(schema, &values)?;
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(&schema.table),
            placeholders.join(",")
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .with_context(|| format!("inserting into {}", schema.table))?;
        Ok(())
    }

    /// Append rows in a single transaction: either all land or none do.
    pub fn insert_batch(&self, schema: &TableSchema, records: &[ResultRecord]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("result BEGIN")?;
        for record in records {
            self.insert(schema, record)?;
        }
        tx.commit().context("result COMMIT")?;
        Ok(())
    }

    /// Set the footprint of every row matching `predicate`. Returns rows touched.
    pub fn update_footprint(
        &self,
        schema: &TableSchema,
        predicate: &KeyPredicate,
        value: f64,
    ) -> Result<usize> {
        check_predicate(schema, predicate)?;
        let sql = format!(
            "UPDATE {} SET {} = ?{} WHERE {}",
            quote_identifier(&schema.table),
            quote_identifier(FOOTPRINT_COLUMN),
            predicate.terms().len() + 1,
            predicate.where_clause()
        );
        let mut params = predicate.params();
        params.push(&value);
        let touched = self
            .conn
            .execute(&sql, params.as_slice())
            .with_context(|| format!("updating {} footprint", schema.table))?;
        Ok(touched)
    }

    /// Whether any row matching `predicate` still carries the zero footprint.
    pub fn has_pending_footprint(
        &self,
        schema: &TableSchema,
        predicate: &KeyPredicate,
    ) -> Result<bool> {
        check_predicate(schema, predicate)?;
        Ok(self.count_matching(schema, predicate, Some(FOOTPRINT_COLUMN))? > 0)
    }

    /// Number of rows in the table.
    pub fn count(&self, schema: &TableSchema) -> Result<i64> {
        self.count_matching(schema, &KeyPredicate::new(), None)
    }

    fn count_matching(
        &self,
        schema: &TableSchema,
        predicate: &KeyPredicate,
        zero_column: Option<&str>,
    ) -> Result<i64> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_identifier(&schema.table),
            predicate.where_clause()
        );
        if let Some(col) = zero_column {
            sql.push_str(&format!(" AND {} = 0", quote_identifier(col)));
        }
        let count = self
            .conn
            .query_row(&sql, predicate.params().as_slice(), |r| r.get(0))
            .with_context(|| format!("querying {}", schema.table))?;
        Ok(count)
    }
}

/// Rows of one configuration at one point of the sweep axes.
pub fn sweep_key(
    schema: &TableSchema,
    algo_values: &[FieldValue],
    case_values: &[FieldValue],
    top: u32,
    batch_size: u32,
    thread_count: u32,
) -> KeyPredicate {
    let mut predicate = algo_predicate(schema, algo_values);
    for (spec, value) in schema.case_fields.iter().zip(case_values) {
        predicate = predicate.and_eq(spec.name.clone(), value.clone());
    }
    predicate
        .and_eq(TOP_COLUMN, FieldValue::Integer(i64::from(top)))
        .and_eq(BATCH_SIZE_COLUMN, FieldValue::Integer(i64::from(batch_size)))
        .and_eq(THREAD_COUNT_COLUMN, FieldValue::Integer(i64::from(thread_count)))
}

/// All rows of one algorithm configuration, whatever their case or axes.
pub fn algo_predicate(schema: &TableSchema, algo_values: &[FieldValue]) -> KeyPredicate {
    schema
        .algo_fields
        .iter()
        .zip(algo_values)
        .fold(KeyPredicate::new(), |p, (spec, value)| {
            p.and_eq(spec.name.clone(), value.clone())
        })
}

fn check_predicate(schema: &TableSchema, predicate: &KeyPredicate) -> Result<(), StoreError> {
    for (column, value) in predicate.terms() {
        let declared = schema
            .column_type(column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: schema.table.clone(),
                column: column.clone(),
            })?;
        if declared != value.field_type() {
            return Err(StoreError::FieldType {
                column: column.clone(),
                declared: declared.sql_name(),
                found: value.field_type().sql_name(),
            });
        }
    }
    Ok(())
}

fn check_values(schema: &TableSchema, values: &[FieldValue]) -> Result<(), StoreError> {
    let columns = schema.columns();
    if columns.len() != values.len() {
        return Err(StoreError::FieldCount {
            table: schema.table.clone(),
            expected: columns.len(),
            found: values.len(),
        });
    }
    for ((column, declared), value) in columns.iter().zip(values) {
        if *declared != value.field_type() {
            return Err(StoreError::FieldType {
                column: column.clone(),
                declared: declared.sql_name(),
                found: value.field_type().sql_name(),
            });
        }
    }
    Ok(())
}
