//! Typed failures for the contract violations a sweep can hit.
//!
//! Plumbing errors (I/O, SQLite, config files) travel as `anyhow::Error`
//! with context attached. The enums here cover the cases a caller may want
//! to tell apart: a malformed benchmark stream, a store whose contents break
//! the key invariant, and an external tool that exited unsuccessfully.

use std::path::PathBuf;
use thiserror::Error;

/// The benchmark or footprint output did not follow the fixed line grammar.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line}: expected {expected} tokens, found {found}")]
    TokenCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: expected label `{expected}`, found `{found}`")]
    LabelMismatch {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("line {line}: statistic token `{token}` has no `=`")]
    MissingEquals { line: usize, token: String },

    #[error("line {line}: `{value}` is not a number")]
    InvalidNumber { line: usize, value: String },

    #[error("expected {expected} output lines for {cases} cases, found {found}")]
    LineCount {
        cases: usize,
        expected: usize,
        found: usize,
    },
}

/// The result store was asked to do something that breaks its invariants.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("`{0}` is not a valid SQL identifier")]
    InvalidIdentifier(String),

    #[error("column `{0}` is declared more than once")]
    DuplicateColumn(String),

    #[error("table `{table}`: {matches} rows match a single sweep key")]
    DuplicateKey { table: String, matches: i64 },

    #[error("table `{table}`: expected {expected} values, got {found}")]
    FieldCount {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("column `{column}` is declared {declared} but got a {found} value")]
    FieldType {
        column: String,
        declared: &'static str,
        found: &'static str,
    },

    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },
}

/// An external engine invocation did not produce what the sweep needs.
#[derive(Debug, Error, PartialEq)]
pub enum RunnerError {
    #[error("`{program}` exited with status {code}")]
    NonZeroExit { program: String, code: i32 },

    #[error("index {0} is not readable after the build step")]
    MissingIndex(PathBuf),
}

impl RunnerError {
    /// Exit code the sweep process should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::NonZeroExit { code, .. } => *code,
            RunnerError::MissingIndex(_) => 1,
        }
    }
}
