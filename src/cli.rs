//! CLI definition and dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::progress_adapter::TracingProgress;
use crate::adapters::sqlite_adapter::{SqliteAdapter, DEFAULT_POOL_SIZE};
use crate::domain::backtest::{BacktestConfig, BacktestType};
use crate::domain::error::SigbenchError;
use crate::domain::orchestrator::{Orchestrator, RunSummary};
use crate::domain::pattern;
use crate::domain::pattern::scanner::RANDOM_SIGNAL;
use crate::ports::config_port::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "sigbench", about = "Candlestick signal backtester")]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Which backtest type a `backtest` invocation accepts.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Runner {
    Candlestick,
    Random,
}

impl From<Runner> for BacktestType {
    fn from(runner: Runner) -> Self {
        match runner {
            Runner::Candlestick => BacktestType::CandlestickPattern,
            Runner::Random => BacktestType::RandomBaseline,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// SQLite database, overrides storage.path
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        /// Reject configurations of any other type
        #[arg(long, value_enum)]
        runner: Option<Runner>,
    },
    /// Build split-adjusted bars from raw bars
    Adjust {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        source: String,
        #[arg(long)]
        code: Option<String>,
    },
    /// List process ids and their runs
    Processes {
        #[arg(long)]
        db: PathBuf,
    },
    /// Delete every run created by the given processes
    DeleteProcesses {
        #[arg(long)]
        db: PathBuf,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// List the signal catalog
    Signals,
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Command::Backtest {
            config,
            db,
            dry_run,
            runner,
        } => {
            if dry_run {
                run_dry_run(&config, runner)
            } else {
                run_backtest(&config, db.as_deref(), runner)
            }
        }
        Command::Adjust { db, source, code } => run_adjust(&db, &source, code.as_deref()),
        Command::Processes { db } => run_processes(&db),
        Command::DeleteProcesses { db, ids } => run_delete_processes(&db, &ids),
        Command::Signals => run_signals(),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second call (tests) leaves the first subscriber in place.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn fail(e: &SigbenchError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

/// Reads and validates a configuration, checking its type against `runner`.
pub fn load_config(path: &Path, runner: Option<Runner>) -> Result<BacktestConfig, SigbenchError> {
    let config = FileConfigAdapter::from_file(path)?.load()?;
    if let Some(runner) = runner {
        config.expect_type(runner.into())?;
    }
    Ok(config)
}

/// Opens the run database: `--db` first, then `storage.path`.
pub fn open_store(db: Option<&Path>, config: &BacktestConfig) -> Result<SqliteAdapter, SigbenchError> {
    let storage = config.storage.as_ref();
    let path = db
        .map(Path::to_path_buf)
        .or_else(|| storage.and_then(|s| s.path.clone()))
        .ok_or_else(|| SigbenchError::ConfigMissing {
            section: "storage".into(),
            key: "path".into(),
        })?;
    let pool_size = storage.and_then(|s| s.pool_size).unwrap_or(DEFAULT_POOL_SIZE);
    let store = SqliteAdapter::open(&path, pool_size)?;
    store.initialize_schema()?;
    Ok(store)
}

/// Validates a configuration and prints what a run would scan for.
pub fn run_dry_run(config_path: &Path, runner: Option<Runner>) -> ExitCode {
    let config = match load_config(config_path, runner) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    println!("Configuration valid: {}", config.name);
    println!("  type:      {}", config.backtest_type);
    println!("  source:    {}", config.source);
    println!("  interval:  {:?}", config.interval());
    println!("  lookback:  {}", config.lookback());
    match config.backtest_type {
        BacktestType::CandlestickPattern => {
            let patterns = match config.patterns() {
                Ok(p) => p,
                Err(e) => return fail(&e),
            };
            println!("  signals:   {}", patterns.len());
            for p in patterns {
                println!("    {} ({} bars, {})", p.name, p.bars_required, p.predicted);
            }
        }
        BacktestType::RandomBaseline => {
            println!("  signals:   {RANDOM_SIGNAL} (seed {})", config.random_seed);
        }
    }
    if let Some(market) = &config.market {
        println!("  market:    {}", market.codes.join(", "));
    }
    ExitCode::SUCCESS
}

fn run_backtest(config_path: &Path, db: Option<&Path>, runner: Option<Runner>) -> ExitCode {
    // Stage 1: configuration
    let config = match load_config(config_path, runner) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    // Stage 2: storage
    let store = match open_store(db, &config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    // Stage 3: run
    let process_id = Uuid::new_v4();
    let progress = TracingProgress;
    let mut orchestrator = Orchestrator::new(&store, &store).with_progress(&progress);
    if let Some(runner) = runner {
        orchestrator = orchestrator.expecting(runner.into());
    }
    let outcome = orchestrator.run(&config, process_id);

    // Stage 4: report
    finish_backtest(outcome)
}

/// Prints the report for a finished run and picks the exit code: 5 when any
/// symbol failed, the error's own code when the run did not finish.
pub fn finish_backtest(outcome: Result<RunSummary, SigbenchError>) -> ExitCode {
    let summary = match outcome {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match format_report(&summary) {
        Ok(text) => print!("{text}"),
        Err(e) => warn!(run_id = %summary.run.id, error = %e, "could not format run report"),
    }
    if summary.is_degraded() {
        eprintln!(
            "warning: {} of {} symbols failed",
            summary.symbols_failed, summary.symbols_total
        );
        ExitCode::from(5)
    } else {
        ExitCode::SUCCESS
    }
}

/// Plain-text run report: identity, counts and the Overall row per signal.
pub fn format_report(summary: &RunSummary) -> Result<String, fmt::Error> {
    let run = &summary.run;
    let mut out = String::new();
    writeln!(out, "Backtest {} ({})", run.name, run.backtest_type)?;
    writeln!(out, "  run id:      {}", run.id)?;
    writeln!(out, "  process id:  {}", run.process_id)?;
    writeln!(out, "  elapsed:     {:.2}s", summary.elapsed.as_secs_f64())?;
    writeln!(
        out,
        "  symbols:     {} total, {} scanned, {} skipped, {} failed",
        summary.symbols_total, summary.symbols_scanned, summary.symbols_skipped, summary.symbols_failed
    )?;
    writeln!(
        out,
        "  matches:     {} ({} unresolved), {} results stored, {} store failures",
        summary.matches, summary.unresolved, summary.results_persisted, summary.persistence_failures
    )?;
    if summary.fetch_halted {
        writeln!(out, "  fetching halted by a rate limit")?;
    }
    if summary.overall.is_empty() {
        writeln!(out, "  no signals found")?;
        return Ok(out);
    }
    writeln!(
        out,
        "\n  {:<40} {:>8} {:>9} {:>9} {:>14} {:>10}",
        "Signal", "Symbols", "Signals", "Success", "Criterion", "Days"
    )?;
    for row in &summary.overall {
        writeln!(
            out,
            "  {:<40} {:>8} {:>9} {:>8.1}% {:>14} {:>10.1}",
            row.signal_name,
            row.number_entities,
            row.number_signals,
            row.success_percentage * 100.0,
            row.success_criterion,
            row.success_duration_trading_days
        )?;
    }
    Ok(out)
}

fn run_adjust(db: &Path, source: &str, code: Option<&str>) -> ExitCode {
    let store = match SqliteAdapter::open(db, DEFAULT_POOL_SIZE).and_then(|s| {
        s.initialize_schema()?;
        Ok(s)
    }) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let codes = match code {
        Some(c) => vec![c.to_string()],
        None => match store.raw_codes(source) {
            Ok(c) => c,
            Err(e) => return fail(&e),
        },
    };
    if codes.is_empty() {
        eprintln!("No raw bars found for source {source}");
        return ExitCode::SUCCESS;
    }

    let mut failed = 0usize;
    for code in &codes {
        match store.adjust(source, code) {
            Ok(n) => info!(code = %code, bars = n, "adjusted"),
            Err(e) => {
                // A single symbol stops the batch only when a code was named.
                if codes.len() == 1 {
                    return fail(&e);
                }
                warn!(code = %code, error = %e, "adjustment failed");
                failed += 1;
            }
        }
    }
    eprintln!("{} symbols adjusted, {} failed", codes.len() - failed, failed);
    if failed > 0 { ExitCode::from(5) } else { ExitCode::SUCCESS }
}

fn run_processes(db: &Path) -> ExitCode {
    let store = match SqliteAdapter::open(db, 1) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let processes = match store.initialize_schema().and_then(|_| store.processes()) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    if processes.is_empty() {
        eprintln!("No processes found");
    } else {
        for p in &processes {
            println!(
                "{}  {:>4} runs  {}",
                p.process_id,
                p.runs,
                p.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    ExitCode::SUCCESS
}

fn run_delete_processes(db: &Path, ids: &[Uuid]) -> ExitCode {
    let store = match SqliteAdapter::open(db, 1) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match store.initialize_schema().and_then(|_| store.delete_processes(ids)) {
        Ok(n) => {
            eprintln!("Deleted {n} runs from {} processes", ids.len());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_signals() -> ExitCode {
    println!("{:<40} {:>4} {:>9} {:>9}", "Signal", "Bars", "Predicts", "Requires");
    for p in pattern::catalog() {
        println!(
            "{:<40} {:>4} {:>9} {:>9}",
            p.name, p.bars_required, p.predicted, p.required
        );
    }
    ExitCode::SUCCESS
}
