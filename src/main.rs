use annsweep::sweep::reader::ResultReader;
use annsweep::sweep::{plan_sweep, run_sweep, ResultStore};
use annsweep::{Config, RunnerError};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Resumable ANN index benchmark sweeps.
#[derive(Parser, Debug)]
#[command(name = "annsweep", version, about)]
struct Cli {
    /// Sweep configuration file
    #[arg(short, long, default_value = "annsweep.toml")]
    config: PathBuf,

    /// Log debug output (engine command lines, skipped cases)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configuration not yet recorded
    Run,
    /// Print the case batches a run would submit
    Plan,
    /// Print recorded rows as JSON lines
    Export {
        /// Maximum number of rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the CREATE TABLE statement for the configured family
    Schema,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "annsweep=debug" } else { "annsweep=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Run => {
            let store = ResultStore::open(&config.output.out_dir, &config.output.db_file)?;
            let engine = config.process_engine();
            tracing::info!(
                family = config.algorithm.name(),
                table = %config.output.table,
                db = %store.db_path().display(),
                "starting sweep"
            );
            let report = run_sweep(&engine, &store, &config)?;
            tracing::info!(
                configurations = report.configurations.len(),
                inserted = report.inserted(),
                runs = report.benchmark_runs(),
                "sweep finished"
            );
        }
        Command::Plan => {
            let store = ResultStore::open(&config.output.out_dir, &config.output.db_file)?;
            for batch in plan_sweep(&store, &config)? {
                println!(
                    "{}\ttop={}\tcases={}\t{}",
                    batch.key, batch.top, batch.case_count, batch.expressions
                );
            }
        }
        Command::Export { limit } => {
            let reader = ResultReader::open(&config.output.out_dir.join(&config.output.db_file))?;
            for row in reader.export_rows(&config.output.table, limit)? {
                println!("{}", serde_json::Value::Object(row));
            }
        }
        Command::Schema => {
            println!("{}", config.schema()?.create_table_sql());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            // An engine failure ends the sweep with the engine's own status.
            let code = err
                .downcast_ref::<RunnerError>()
                .map_or(1, RunnerError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
