//! Resumable parameter sweeps over ANN indices built by an external engine.
//!
//! A sweep crosses each index configuration with its query cases and the
//! fixed result-size / batch-size / thread-count axes, skips combinations
//! already in the SQLite result table, runs the rest through the engine's
//! `benchmark` tool in one batch per result-size target and records the
//! parsed measurements.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod sweep;

pub use config::Config;
pub use error::{ParseError, RunnerError, StoreError};
