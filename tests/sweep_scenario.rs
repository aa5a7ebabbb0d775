use annsweep::sweep::reader::ResultReader;
use annsweep::sweep::{run_sweep, Engine, ResultStore};
use annsweep::{Config, ParseError};
use anyhow::Result;
use std::cell::RefCell;
use std::path::Path;
use tempfile::TempDir;

/// Engine stand-in that replays a fixed benchmark stream.
struct ReplayEngine {
    benchmark_output: String,
    footprint: String,
    expressions: RefCell<Vec<String>>,
}

impl Engine for ReplayEngine {
    fn build_index(
        &self,
        index_path: &Path,
        _key: &str,
        _parameters: &str,
        _dataset_path: &Path,
        _train_fraction: f64,
    ) -> Result<()> {
        std::fs::write(index_path, b"idx")?;
        Ok(())
    }

    fn run_benchmark(
        &self,
        _index_path: &Path,
        _query_path: &Path,
        _groundtruth_path: &Path,
        _top: u32,
        _percentiles: &[f64],
        expressions: &str,
    ) -> Result<String> {
        self.expressions.borrow_mut().push(expressions.to_string());
        Ok(self.benchmark_output.clone())
    }

    fn report_footprint(&self, _index_path: &Path) -> Result<String> {
        Ok(self.footprint.clone())
    }
}

const BLOCK: &str = "qps: 950.0
cpu-util: 87.5
mem-r-bw: 1200.0
mem-w-bw: 300.0
latency: best=0.1 worst=0.9 avg=0.3 P99=0.7 P999=0.85
recall: best=0.99 worst=0.80 avg=0.95 P99=0.85 P999=0.82
";

fn scenario_config(tmp: &TempDir) -> Config {
    let toml = format!(
        r#"
        [dataset]
        data_dir = "{data}"

        [output]
        out_dir = "{out}"
        db_file = "ivfflat.db"
        table = "scenario"

        [sweep]
        percentiles = [99, 99.9]
        tops = [10]
        batch_sizes = [1]
        thread_counts = [4]
        cpus = "0-7"

        [algorithm]
        family = "ivfflat"
        centroids = [1024]
        nprobes = [32]
        "#,
        data = tmp.path().display(),
        out = tmp.path().join("out").display(),
    );
    let config = Config::from_toml_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

#[test]
fn single_case_is_recorded_then_sized() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let engine = ReplayEngine {
        benchmark_output: BLOCK.to_string(),
        footprint: "4194304\n".to_string(),
        expressions: RefCell::new(Vec::new()),
    };

    {
        let store = ResultStore::open(&config.output.out_dir, &config.output.db_file).unwrap();
        let report = run_sweep(&engine, &store, &config).unwrap();
        assert_eq!(report.inserted(), 1);
    }
    assert_eq!(
        engine.expressions.borrow().as_slice(),
        &["nprobe=32/1x4:0,1,2,3".to_string()]
    );

    let reader = ResultReader::open(&config.output.out_dir.join("ivfflat.db")).unwrap();
    let rows = reader.export_rows("scenario", None).unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["centroid"], 1024);
    assert_eq!(row["nprobe"], 32);
    assert_eq!(row["top"], 10);
    assert_eq!(row["batch_size"], 1);
    assert_eq!(row["thread_count"], 4);
    assert_eq!(row["qps"], 950.0);
    assert_eq!(row["cpu_util"], 87.5);
    assert_eq!(row["mem_r_bw"], 1200.0);
    assert_eq!(row["mem_w_bw"], 300.0);
    assert_eq!(row["latency_best"], 0.1);
    assert_eq!(row["latency_worst"], 0.9);
    assert_eq!(row["latency_avg"], 0.3);
    assert_eq!(row["latency_P99"], 0.7);
    assert_eq!(row["latency_P999"], 0.85);
    assert_eq!(row["recall_best"], 0.99);
    assert_eq!(row["recall_worst"], 0.80);
    assert_eq!(row["recall_avg"], 0.95);
    assert_eq!(row["recall_P99"], 0.85);
    assert_eq!(row["recall_P999"], 0.82);
    assert_eq!(row["mem_size"], 4_194_304.0);
}

#[test]
fn short_statistics_line_aborts_without_rows() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let engine = ReplayEngine {
        benchmark_output: BLOCK.replace(" P999=0.85", ""),
        footprint: "1\n".to_string(),
        expressions: RefCell::new(Vec::new()),
    };

    let store = ResultStore::open(&config.output.out_dir, &config.output.db_file).unwrap();
    let err = run_sweep(&engine, &store, &config).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ParseError>(),
        Some(&ParseError::TokenCount {
            line: 5,
            expected: 6,
            found: 5
        })
    );
    assert_eq!(store.count(&config.schema().unwrap()).unwrap(), 0);
}
