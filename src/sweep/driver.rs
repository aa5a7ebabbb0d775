use crate::config::{Config, DatasetConfig};
use crate::error::RunnerError;
use crate::sweep::footprint::update_size;
use crate::sweep::matrix::{
    join_expressions, AlgorithmConfiguration, CaseMatrixBuilder, CpuPool, QueryCase, SweepAxes,
};
use crate::sweep::parser::parse_output;
use crate::sweep::runner::{is_readable, Engine};
use crate::sweep::schema::TableSchema;
use crate::sweep::store::{algo_predicate, ResultRecord, ResultStore};
use anyhow::Result;
use std::path::Path;

/// What one algorithm configuration's sweep did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSummary {
    pub key: String,
    pub built: bool,
    pub benchmark_runs: usize,
    pub inserted: usize,
    pub footprint_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub configurations: Vec<ConfigurationSummary>,
}

impl SweepReport {
    pub fn inserted(&self) -> usize {
        self.configurations.iter().map(|c| c.inserted).sum()
    }

    pub fn benchmark_runs(&self) -> usize {
        self.configurations.iter().map(|c| c.benchmark_runs).sum()
    }
}

/// Cases still to run for one configuration at one result-size target.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    pub key: String,
    pub top: u32,
    pub expressions: String,
    pub case_count: usize,
}

/// Sequential sweep over configurations against one table.
pub struct Sweep<'a, E: Engine> {
    engine: &'a E,
    store: &'a ResultStore,
    schema: &'a TableSchema,
    axes: &'a SweepAxes,
    cpus: &'a CpuPool,
    dataset: &'a DatasetConfig,
}

impl<'a, E: Engine> Sweep<'a, E> {
    pub fn new(
        engine: &'a E,
        store: &'a ResultStore,
        schema: &'a TableSchema,
        axes: &'a SweepAxes,
        cpus: &'a CpuPool,
        dataset: &'a DatasetConfig,
    ) -> Self {
        Self {
            engine,
            store,
            schema,
            axes,
            cpus,
            dataset,
        }
    }

    /// Run every result-size target for `config`, then record its footprint.
    ///
    /// The footprint is refreshed when this run inserted rows or when earlier
    /// rows of the configuration still hold the zero placeholder, so a fully
    /// recorded configuration costs no engine invocation.
    pub fn run_configuration(
        &self,
        config: &AlgorithmConfiguration,
        cases: &[QueryCase],
    ) -> Result<ConfigurationSummary> {
        let mut summary = ConfigurationSummary {
            key: config.key.clone(),
            ..Default::default()
        };
        let index_path = self.dataset.index_path(&config.key);

        for &top in &self.axes.tops {
            self.run_top(config, cases, top, &index_path, &mut summary)?;
        }

        let predicate = algo_predicate(self.schema, &config.values);
        if summary.inserted > 0 || self.store.has_pending_footprint(self.schema, &predicate)? {
            summary.footprint_rows =
                update_size(self.engine, self.store, self.schema, config, &index_path)?;
        } else {
            tracing::warn!(key = %config.key, "configuration already recorded");
        }
        Ok(summary)
    }

    fn run_top(
        &self,
        config: &AlgorithmConfiguration,
        cases: &[QueryCase],
        top: u32,
        index_path: &Path,
        summary: &mut ConfigurationSummary,
    ) -> Result<()> {
        let builder = CaseMatrixBuilder::new(self.store, self.schema, self.cpus);
        let surviving = builder.build(config, cases, self.axes, top)?;
        if surviving.is_empty() {
            tracing::debug!(key = %config.key, top, "no cases left for target");
            return Ok(());
        }

        if self.ensure_index(config, index_path)? {
            summary.built = true;
        }

        let expressions = join_expressions(&surviving, &self.schema.case_fields);
        tracing::info!(
            key = %config.key,
            top,
            cases = surviving.len(),
            "running benchmark batch"
        );
        let raw = self.engine.run_benchmark(
            index_path,
            &self.dataset.query_path(),
            &self.dataset.groundtruth_path(),
            top,
            &self.schema.percentiles,
            &expressions,
        )?;
        summary.benchmark_runs += 1;

        let metrics = parse_output(&raw, surviving.len(), self.schema.percentiles.len())?;
        let records: Vec<ResultRecord> = surviving
            .into_iter()
            .zip(metrics)
            .map(|(case, metrics)| ResultRecord {
                algo_values: config.values.clone(),
                case_values: case.case.values,
                top: case.top,
                batch_size: case.batch_size,
                thread_count: case.thread_count,
                metrics,
            })
            .collect();
        self.store.insert_batch(self.schema, &records)?;
        summary.inserted += records.len();
        Ok(())
    }

    /// Build the index unless it is already readable. Returns whether a build ran.
    fn ensure_index(&self, config: &AlgorithmConfiguration, index_path: &Path) -> Result<bool> {
        if is_readable(index_path) {
            return Ok(false);
        }
        tracing::info!(key = %config.key, path = %index_path.display(), "building index");
        self.engine.build_index(
            index_path,
            &config.key,
            &config.parameters,
            &self.dataset.base_path(),
            self.dataset.train_ratio,
        )?;
        if !is_readable(index_path) {
            return Err(RunnerError::MissingIndex(index_path.to_path_buf()).into());
        }
        Ok(true)
    }
}

/// Run the whole configured sweep against `store`.
pub fn run_sweep<E: Engine>(engine: &E, store: &ResultStore, config: &Config) -> Result<SweepReport> {
    let schema = config.schema()?;
    store.ensure_schema(&schema)?;
    let axes = config.sweep.axes();
    let cpus = config.sweep.cpu_pool()?;
    let cases = config.algorithm.query_cases()?;
    let sweep = Sweep::new(engine, store, &schema, &axes, &cpus, &config.dataset);

    let mut report = SweepReport::default();
    for algo in config.algorithm.configurations()? {
        let summary = sweep.run_configuration(&algo, &cases)?;
        tracing::info!(
            key = %summary.key,
            inserted = summary.inserted,
            runs = summary.benchmark_runs,
            "configuration done"
        );
        report.configurations.push(summary);
    }
    Ok(report)
}

/// The batches [`run_sweep`] would submit, without invoking the engine.
pub fn plan_sweep(store: &ResultStore, config: &Config) -> Result<Vec<PlannedBatch>> {
    let schema = config.schema()?;
    store.ensure_schema(&schema)?;
    let axes = config.sweep.axes();
    let cpus = config.sweep.cpu_pool()?;
    let cases = config.algorithm.query_cases()?;
    let builder = CaseMatrixBuilder::new(store, &schema, &cpus);

    let mut batches = Vec::new();
    for algo in config.algorithm.configurations()? {
        for &top in &axes.tops {
            let surviving = builder.build(&algo, &cases, &axes, top)?;
            if surviving.is_empty() {
                continue;
            }
            batches.push(PlannedBatch {
                key: algo.key.clone(),
                top,
                expressions: join_expressions(&surviving, &schema.case_fields),
                case_count: surviving.len(),
            });
        }
    }
    Ok(batches)
}
