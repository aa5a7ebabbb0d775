//! Sweep configuration.
//!
//! Loaded from a TOML file, then paths are expanded (`~`, `$VAR`) and a few
//! settings can be overridden from the environment:
//! - `ANNSWEEP_OUT_DIR`
//! - `ANNSWEEP_DATA_DIR`
//! - `ANNSWEEP_TABLE`
//! - `ANNSWEEP_LIB_DIR`
//!
//! ```toml
//! [engine]
//! index_bin = "../index"
//! benchmark_bin = "../benchmark"
//! lib_dir = "~/faiss"
//! numactl = { cpunodebind = "0", localalloc = true }
//!
//! [dataset]
//! data_dir = "~/sift"
//!
//! [output]
//! out_dir = "~/output"
//! db_file = "ivfpq.db"
//! table = "benchmark_8260L"
//!
//! [sweep]
//! percentiles = [99, 99.9]
//! tops = [10, 100]
//! thread_counts = [1, 2]
//! cpus = "0-3"
//!
//! [algorithm]
//! family = "ivfpq"
//! centroids = { start = 1024, end = 8192, step = 1024 }
//! codes = [64]
//! nprobes = { start = 32, end = 512, step = 32 }
//! ```

use crate::algorithm::{first_duplicate, AlgorithmFamily};
use crate::sweep::matrix::{CpuPool, SweepAxes};
use crate::sweep::runner::{CommandEnv, NumaPolicy, ProcessEngine};
use crate::sweep::schema::{validate_identifier, TableSchema};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "ANNSWEEP_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub dataset: DatasetConfig,
    pub output: OutputConfig,
    pub sweep: SweepConfig,
    pub algorithm: AlgorithmFamily,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index_bin: PathBuf,
    pub benchmark_bin: PathBuf,
    /// Directory holding the engine's shared libraries.
    pub lib_dir: Option<PathBuf>,
    pub omp_num_threads: Option<u32>,
    pub numactl: Option<NumactlConfig>,
    /// Distance metric passed to the index builder (`l2`, `ip`, `raw:<n>`).
    pub metric: String,
    /// Vectors added per loop during build; omitted from the command when unset.
    pub add_batch_size: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_bin: PathBuf::from("../index"),
            benchmark_bin: PathBuf::from("../benchmark"),
            lib_dir: None,
            omp_num_threads: Some(1),
            numactl: None,
            metric: "l2".to_string(),
            add_batch_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NumactlConfig {
    pub cpunodebind: Option<String>,
    #[serde(default = "default_true")]
    pub localalloc: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_groundtruth")]
    pub groundtruth: String,
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
}

fn default_base() -> String {
    "base.fvecs".to_string()
}

fn default_query() -> String {
    "query.fvecs".to_string()
}

fn default_groundtruth() -> String {
    "groundtruth.ivecs".to_string()
}

fn default_train_ratio() -> f64 {
    0.1
}

impl DatasetConfig {
    /// Where the index for `key` is built and read from.
    pub fn index_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.idx"))
    }

    pub fn base_path(&self) -> PathBuf {
        self.data_dir.join(&self.base)
    }

    pub fn query_path(&self) -> PathBuf {
        self.data_dir.join(&self.query)
    }

    pub fn groundtruth_path(&self) -> PathBuf {
        self.data_dir.join(&self.groundtruth)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputConfig {
    pub out_dir: PathBuf,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    pub table: String,
}

fn default_db_file() -> String {
    "results.db".to_string()
}

/// Either `[0, 1, 2]` or `"0-23,48-71"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CpuSpec {
    List(Vec<u32>),
    Ranges(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    pub tops: Vec<u32>,
    #[serde(default = "default_one")]
    pub batch_sizes: Vec<u32>,
    #[serde(default = "default_one")]
    pub thread_counts: Vec<u32>,
    /// Defaults to every CPU of the host.
    pub cpus: Option<CpuSpec>,
}

fn default_percentiles() -> Vec<f64> {
    vec![99.0, 99.9]
}

fn default_one() -> Vec<u32> {
    vec![1]
}

impl SweepConfig {
    pub fn axes(&self) -> SweepAxes {
        SweepAxes {
            tops: self.tops.clone(),
            batch_sizes: self.batch_sizes.clone(),
            thread_counts: self.thread_counts.clone(),
        }
    }

    pub fn cpu_pool(&self) -> Result<CpuPool> {
        match &self.cpus {
            Some(CpuSpec::List(cpus)) => Ok(CpuPool::new(cpus.clone())),
            Some(CpuSpec::Ranges(spec)) => CpuPool::parse(spec),
            None => Ok(CpuPool::detect()),
        }
    }
}

impl Config {
    /// Read, expand, override and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        config.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok());
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides looked up by unprefixed name (`OUT_DIR`, `TABLE`, ...).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OUT_DIR") {
            self.output.out_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.dataset.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TABLE") {
            self.output.table = v;
        }
        if let Some(v) = lookup("LIB_DIR") {
            self.engine.lib_dir = Some(PathBuf::from(v));
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.engine.index_bin = expand(&self.engine.index_bin)?;
        self.engine.benchmark_bin = expand(&self.engine.benchmark_bin)?;
        self.engine.lib_dir = self.engine.lib_dir.as_deref().map(expand).transpose()?;
        self.dataset.data_dir = expand(&self.dataset.data_dir)?;
        self.output.out_dir = expand(&self.output.out_dir)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.output.table)?;

        let sweep = &self.sweep;
        if sweep.tops.is_empty() || sweep.tops.contains(&0) {
            bail!("sweep.tops must be non-empty and positive");
        }
        if sweep.batch_sizes.is_empty() || sweep.batch_sizes.contains(&0) {
            bail!("sweep.batch_sizes must be non-empty and positive");
        }
        if sweep.thread_counts.is_empty() || sweep.thread_counts.contains(&0) {
            bail!("sweep.thread_counts must be non-empty and positive");
        }
        for (name, values) in [
            ("tops", &sweep.tops),
            ("batch_sizes", &sweep.batch_sizes),
            ("thread_counts", &sweep.thread_counts),
        ] {
            if let Some(dup) = first_duplicate(values) {
                bail!("sweep.{name} repeats the value {dup}");
            }
        }
        if let Some(p) = sweep.percentiles.iter().find(|p| !(**p > 0.0 && **p < 100.0)) {
            bail!("percentile {p} is outside (0, 100)");
        }

        let pool = sweep.cpu_pool()?;
        if let Some(max) = sweep.thread_counts.iter().max() {
            if *max as usize > pool.len() {
                bail!(
                    "thread count {max} exceeds the CPU pool of {} entries",
                    pool.len()
                );
            }
        }

        let ratio = self.dataset.train_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("dataset.train_ratio {ratio} is outside (0, 1]");
        }

        self.algorithm.configurations()?;
        self.algorithm.query_cases()?;
        self.schema()?;
        Ok(())
    }

    pub fn schema(&self) -> Result<TableSchema> {
        Ok(self
            .algorithm
            .schema(&self.output.table, &self.sweep.percentiles)?)
    }

    pub fn process_engine(&self) -> ProcessEngine {
        let engine = &self.engine;
        ProcessEngine {
            index_bin: engine.index_bin.clone(),
            benchmark_bin: engine.benchmark_bin.clone(),
            metric: engine.metric.clone(),
            add_batch_size: engine.add_batch_size,
            env: CommandEnv {
                lib_dir: engine.lib_dir.clone(),
                omp_num_threads: engine.omp_num_threads,
                numa: engine.numactl.as_ref().map(|n| NumaPolicy {
                    cpunodebind: n.cpunodebind.clone(),
                    localalloc: n.localalloc,
                }),
            },
        }
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded =
        shellexpand::full(&raw).with_context(|| format!("expanding path: {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
