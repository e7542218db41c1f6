#![forbid(unsafe_code)]

mod output;
mod script;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use output::{CliError, OutputMode};
use shelfmark_core::config::{ConfigError, load_engine_config};
use shelfmark_core::observer::TracingObserver;
use shelfmark_core::{MemoryStore, TransactionManager};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "shm: undoable bookmark transactions",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Engine config file, layered over the user and project files.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run a JSON script against a fresh store",
        long_about = "Execute transact/batch/undo/redo/clear/snapshot steps against a fresh \
                      in-memory store, then print each step's outcome, the history and the tree.",
        after_help = "EXAMPLES:\n    # Run a script\n    shm run steps.json\n\n    # Read the script from stdin\n    shm run - < steps.json\n\n    # Emit machine-readable output\n    shm run steps.json --json"
    )]
    Run {
        /// Script path, or `-` for stdin.
        script: PathBuf,
    },
}

/// Filter used when `SHELFMARK_LOG` is unset. Verbose output covers the
/// engine and the `shm` binary itself.
const fn default_filter(verbose: bool, debug_env: bool) -> &'static str {
    if verbose || debug_env {
        "shelfmark=debug,shm=debug,info"
    } else {
        "shelfmark=info,warn"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SHELFMARK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(default_filter(verbose, env::var("DEBUG").is_ok()))
    });

    let format = env::var("SHELFMARK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        return io::read_to_string(io::stdin()).context("failed to read script from stdin");
    }
    fs::read_to_string(path).with_context(|| format!("failed to read script {}", path.display()))
}

fn run_script(path: &Path, config: Option<&Path>, mode: OutputMode) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;
    let config = load_engine_config(&project_root, config)?;
    let steps = script::parse(&read_script(path)?)?;

    let store = MemoryStore::with_roots(Arc::new(TracingObserver), config.store.root_folders);
    let manager = TransactionManager::with_config(store, &config);
    let report = script::Runner::new(&manager).run(&steps)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    output::render(&mut out, mode, &report, output::render_report_human)?;

    let failed = report.failures();
    if failed > 0 {
        bail!("{failed} of {} step(s) failed", report.steps.len());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let mode = cli.output_mode();

    let result = match &cli.command {
        Commands::Run { script } => run_script(script, cli.config.as_deref(), mode),
    };

    if let (Err(err), true) = (&result, mode.is_json()) {
        output::render_error(
            mode,
            &CliError {
                message: format!("{err:#}"),
                error_code: err
                    .downcast_ref::<ConfigError>()
                    .map(|e| e.code().code().to_string()),
            },
        )?;
        std::process::exit(1);
    }
    result
}
