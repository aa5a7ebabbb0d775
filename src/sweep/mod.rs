pub mod driver;
pub mod footprint;
pub mod matrix;
pub mod parser;
pub mod reader;
pub mod runner;
pub mod schema;
pub mod store;

pub use driver::{plan_sweep, run_sweep, Sweep, SweepReport};
pub use matrix::{AlgorithmConfiguration, CaseMatrixBuilder, CpuPool, QueryCase, SweepAxes};
pub use runner::{Engine, ProcessEngine};
pub use store::{ResultRecord, ResultStore};
