use crate::error::RunnerError;
use crate::sweep::schema::percentile_label;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// The external index engine: build an index, benchmark it, report its size.
///
/// Every call blocks until the tool exits. A nonzero exit is returned as
/// [`RunnerError::NonZeroExit`] and ends the sweep.
pub trait Engine {
    fn build_index(
        &self,
        index_path: &Path,
        key: &str,
        parameters: &str,
        dataset_path: &Path,
        train_fraction: f64,
    ) -> Result<()>;

    fn run_benchmark(
        &self,
        index_path: &Path,
        query_path: &Path,
        groundtruth_path: &Path,
        top: u32,
        percentiles: &[f64],
        expressions: &str,
    ) -> Result<String>;

    fn report_footprint(&self, index_path: &Path) -> Result<String>;
}

/// `numactl` placement applied to every invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct NumaPolicy {
    pub cpunodebind: Option<String>,
    pub localalloc: bool,
}

/// Process environment shared by all engine invocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandEnv {
    /// Prepended to `LD_LIBRARY_PATH` so the engine finds its shared runtime.
    pub lib_dir: Option<PathBuf>,
    /// `OMP_NUM_THREADS`, set on every invocation including the benchmark.
    pub omp_num_threads: Option<u32>,
    pub numa: Option<NumaPolicy>,
}

impl CommandEnv {
    /// Start a command for `program`, wrapped in `numactl` when configured.
    /// Arguments are passed as a list, never through a shell.
    pub fn command(&self, program: &Path) -> Command {
        let mut cmd = match &self.numa {
            Some(numa) => {
                let mut cmd = Command::new("numactl");
                if let Some(nodes) = &numa.cpunodebind {
                    cmd.arg(format!("--cpunodebind={nodes}"));
                }
                if numa.localalloc {
                    cmd.arg("--localalloc");
                }
                cmd.arg(program);
                cmd
            }
            None => Command::new(program),
        };
        if let Some(dir) = &self.lib_dir {
            let mut value = OsString::from(dir.as_os_str());
            if let Some(existing) = std::env::var_os("LD_LIBRARY_PATH").filter(|v| !v.is_empty()) {
                value.push(":");
                value.push(existing);
            }
            cmd.env("LD_LIBRARY_PATH", value);
        }
        if let Some(n) = self.omp_num_threads {
            cmd.env("OMP_NUM_THREADS", n.to_string());
        }
        cmd
    }
}

/// [`Engine`] backed by the `index` and `benchmark` executables.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    pub index_bin: PathBuf,
    pub benchmark_bin: PathBuf,
    pub metric: String,
    pub add_batch_size: Option<u64>,
    pub env: CommandEnv,
}

impl ProcessEngine {
    fn index_command(&self) -> Command {
        self.env.command(&self.index_bin)
    }

    /// Run to completion, stdout captured and stderr passed through.
    fn capture(mut cmd: Command) -> Result<String> {
        let program = describe(&cmd);
        tracing::debug!(command = %program, "invoking engine");
        let output = cmd
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("spawning {program}"))?;
        check_status(&program, output.status)?;
        String::from_utf8(output.stdout).with_context(|| format!("{program}: stdout is not UTF-8"))
    }
}

impl Engine for ProcessEngine {
    fn build_index(
        &self,
        index_path: &Path,
        key: &str,
        parameters: &str,
        dataset_path: &Path,
        train_fraction: f64,
    ) -> Result<()> {
        let mut cmd = self.index_command();
        cmd.arg("build")
            .arg(index_path)
            .arg(key)
            .arg(&self.metric)
            .arg(parameters)
            .arg(dataset_path)
            .arg(train_fraction.to_string());
        if let Some(batch) = self.add_batch_size {
            cmd.arg(batch.to_string());
        }
        let program = describe(&cmd);
        tracing::debug!(command = %program, "invoking engine");
        let status = cmd
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("spawning {program}"))?;
        check_status(&program, status)
    }

    fn run_benchmark(
        &self,
        index_path: &Path,
        query_path: &Path,
        groundtruth_path: &Path,
        top: u32,
        percentiles: &[f64],
        expressions: &str,
    ) -> Result<String> {
        let percentiles: Vec<String> = percentiles.iter().map(|&p| percentile_label(p)).collect();
        let mut cmd = self.env.command(&self.benchmark_bin);
        cmd.arg(index_path)
            .arg(query_path)
            .arg(groundtruth_path)
            .arg(top.to_string())
            .arg(percentiles.join(","))
            .arg(expressions);
        Self::capture(cmd)
    }

    fn report_footprint(&self, index_path: &Path) -> Result<String> {
        let mut cmd = self.index_command();
        cmd.arg("size").arg(index_path);
        Self::capture(cmd)
    }
}

fn check_status(program: &str, status: std::process::ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    // Killed by a signal: no code, report the conventional 128 + signal.
    #[cfg(unix)]
    let code = {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(1)
    };
    #[cfg(not(unix))]
    let code = status.code().unwrap_or(1);
    Err(RunnerError::NonZeroExit {
        program: program.to_string(),
        code,
    }
    .into())
}

/// Printable command line for logs and errors.
fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `path` can be opened for reading.
pub fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}
