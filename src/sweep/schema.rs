// Column layout and DDL for benchmark result tables.
//
// A table is: algorithm fields, query-case fields, the sweep axes, scalar
// metrics, then latency and recall statistics with one column per
// configured percentile.

use crate::error::StoreError;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::fmt;

pub const TOP_COLUMN: &str = "top";
pub const BATCH_SIZE_COLUMN: &str = "batch_size";
pub const THREAD_COUNT_COLUMN: &str = "thread_count";
pub const FOOTPRINT_COLUMN: &str = "mem_size";

/// Scalar metrics in insert order. The footprint column is last and starts at 0.
pub const SCALAR_METRIC_COLUMNS: [&str; 5] =
    ["qps", "cpu_util", "mem_r_bw", "mem_w_bw", FOOTPRINT_COLUMN];

pub const STATISTIC_PREFIXES: [&str; 2] = ["latency", "recall"];
pub const STATISTIC_NAMES: [&str; 3] = ["best", "worst", "avg"];

pub const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
PRAGMA temp_store   = MEMORY;
";

/// Declared SQLite type of a caller-supplied field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Real,
    Text,
}

impl FieldType {
    pub fn sql_name(self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Text => "TEXT",
        }
    }
}

/// One named, typed column supplied by an algorithm family.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }
}

/// A typed value for an algorithm or query-case field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Real(_) => FieldType::Real,
            FieldValue::Text(_) => FieldType::Text,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Real(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            FieldValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            FieldValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

/// Reject anything that is not a plain `[A-Za-z_][A-Za-z0-9_]*` identifier.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// Percentile as the benchmark tool receives it: `99`, `99.9`.
pub fn percentile_label(p: f64) -> String {
    format!("{p}")
}

/// Column suffix for a percentile, with the decimal point dropped: `P99`, `P999`.
pub fn percentile_suffix(p: f64) -> String {
    format!("P{}", percentile_label(p).replace('.', ""))
}

/// Full column layout of one benchmark series.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table: String,
    pub algo_fields: Vec<FieldSpec>,
    pub case_fields: Vec<FieldSpec>,
    pub percentiles: Vec<f64>,
}

impl TableSchema {
    pub fn new(
        table: impl Into<String>,
        algo_fields: Vec<FieldSpec>,
        case_fields: Vec<FieldSpec>,
        percentiles: Vec<f64>,
    ) -> Result<Self, StoreError> {
        let schema = Self {
            table: table.into(),
            algo_fields,
            case_fields,
            percentiles,
        };
        validate_identifier(&schema.table)?;
        let mut seen = std::collections::HashSet::new();
        for (name, _) in schema.columns() {
            validate_identifier(&name)?;
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(StoreError::DuplicateColumn(name));
            }
        }
        Ok(schema)
    }

    /// Every column in insert order, with its declared type.
    pub fn columns(&self) -> Vec<(String, FieldType)> {
        let mut cols: Vec<(String, FieldType)> = self
            .algo_fields
            .iter()
            .chain(self.case_fields.iter())
            .map(|f| (f.name.clone(), f.ty))
            .collect();
        for axis in [TOP_COLUMN, BATCH_SIZE_COLUMN, THREAD_COUNT_COLUMN] {
            cols.push((axis.to_string(), FieldType::Integer));
        }
        for metric in SCALAR_METRIC_COLUMNS {
            cols.push((metric.to_string(), FieldType::Real));
        }
        for prefix in STATISTIC_PREFIXES {
            for stat in STATISTIC_NAMES {
                cols.push((format!("{prefix}_{stat}"), FieldType::Real));
            }
            for &p in &self.percentiles {
                cols.push((format!("{prefix}_{}", percentile_suffix(p)), FieldType::Real));
            }
        }
        cols
    }

    pub fn column_count(&self) -> usize {
        self.algo_fields.len() + self.case_fields.len() + 3 + 5 + 2 * (3 + self.percentiles.len())
    }

    /// Declared type of a column, if the table has it.
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        self.columns()
            .into_iter()
            .find(|(col, _)| col == name)
            .map(|(_, ty)| ty)
    }

    pub fn create_table_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns()
            .into_iter()
            .map(|(name, ty)| format!("    {} {}", quote_identifier(&name), ty.sql_name()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            quote_identifier(&self.table),
            cols.join(",\n")
        )
    }
}
