mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use stagehand_core::storage::{load_config, OrchestratorConfig, RunLock};
use stagehand_core::{CancelHandle, Orchestrator};

/// Every stage converged
const EXIT_CONVERGED: u8 = 0;
/// A stage failed or the run was cancelled
const EXIT_FAILED: u8 = 1;
/// Configuration or usage error
const EXIT_USAGE: u8 = 2;

/// Stagehand: staged bootstrap orchestrator for local GitOps environments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Bootstrap configuration (.json, .yaml or .toml)
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG", default_value = "stagehand.yaml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Converge every stage of the configuration
    Run {
        /// Worker-pool size; defaults to the configuration, then to the number of root stages
        #[arg(long)]
        concurrency: Option<usize>,
        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the execution waves without touching any external system
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate the configuration only
    Validate,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("warning: cannot bridge log records: {}", e);
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Reports and plans own stdout
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: cannot install log subscriber: {}", e);
    }
}

/// Report a configuration or usage problem
fn usage_error(err: impl std::fmt::Display) -> ExitCode {
    eprintln!("error: {}", err);
    ExitCode::from(EXIT_USAGE)
}

fn load(path: &Path) -> Result<OrchestratorConfig, ExitCode> {
    load_config(path).map_err(usage_error)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ExitCode> {
    let text = serde_json::to_string_pretty(value).map_err(|e| {
        eprintln!("error: cannot render JSON: {}", e);
        ExitCode::from(EXIT_FAILED)
    })?;
    println!("{}", text);
    Ok(())
}

/// Resolves when the operator interrupts or `timeout` elapses
async fn interrupted(timeout: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        warn!("Interrupted; cancelling run");
    };
    let deadline = async {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                warn!("Timeout of {}s reached; cancelling run", limit.as_secs());
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = deadline => {}
    }
}

async fn run(config_path: &Path, concurrency: Option<usize>, timeout: Option<u64>, json: bool) -> ExitCode {
    let config = match load(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let mut orchestrator = match Orchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return usage_error(e),
    };
    if let Some(n) = concurrency {
        orchestrator = match orchestrator.with_concurrency(n) {
            Ok(orchestrator) => orchestrator,
            Err(e) => return usage_error(e),
        };
    }

    let _lock = match RunLock::acquire(&config.state_dir) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let cancel = CancelHandle::new();
    let signal = cancel.signal();
    let watcher = tokio::spawn(async move {
        interrupted(timeout.map(Duration::from_secs)).await;
        cancel.cancel();
    });

    let result = orchestrator.run(signal).await;
    watcher.abort();
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("Run aborted: {}", e);
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    if json {
        if let Err(code) = print_json(&report) {
            return code;
        }
    } else {
        print!("{}", cli::render_report(&report));
    }

    if report.success() {
        ExitCode::from(EXIT_CONVERGED)
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}

fn plan(config_path: &Path, json: bool) -> ExitCode {
    let config = match load(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let plan = match Orchestrator::from_config(&config).and_then(|orchestrator| orchestrator.plan()) {
        Ok(plan) => plan,
        Err(e) => return usage_error(e),
    };
    if json {
        if let Err(code) = print_json(&plan) {
            return code;
        }
    } else {
        print!("{}", plan);
    }
    ExitCode::from(EXIT_CONVERGED)
}

fn validate(config_path: &Path) -> ExitCode {
    match load(config_path) {
        Ok(config) => {
            println!(
                "{}: {} stage(s), configuration is valid",
                config_path.display(),
                config.stages.len()
            );
            ExitCode::from(EXIT_CONVERGED)
        }
        Err(code) => code,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);
    info!("Using configuration {}", args.config.display());

    match args.command {
        Commands::Run {
            concurrency,
            timeout,
            json,
        } => run(&args.config, concurrency, timeout, json).await,
        Commands::Plan { json } => plan(&args.config, json),
        Commands::Validate => validate(&args.config),
    }
}
