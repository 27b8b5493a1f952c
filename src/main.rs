//! ckc-sync CLI
//!
//! Command-line interface for syncing ClaudeKit into Codex.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ckc_sync::config::{CODEX_HOME_ENV, resolve_codex_home};
use ckc_sync::error::SYNC_ERROR_EXIT_CODE;
use ckc_sync::{RunConfig, Scope, SourceSpec, SyncError, output, pipeline};

#[derive(Parser)]
#[command(name = "ckc-sync")]
#[command(
    author,
    version,
    about = "Sync ClaudeKit skills, agents, and config to Codex CLI"
)]
struct Cli {
    /// Sync to $CODEX_HOME or ~/.codex/ (default: ./.codex/)
    #[arg(short, long)]
    global: bool,

    /// Clean target directories before syncing
    #[arg(short, long)]
    fresh: bool,

    /// Overwrite user-edited files without backup (required for zip write mode)
    #[arg(long)]
    force: bool,

    /// Sync from a ClaudeKit zip instead of live ~/.claude/ (newest in the temp dir when no path is given)
    #[arg(long, value_name = "PATH", num_args = 0..=1, conflicts_with = "source")]
    zip: Option<Option<PathBuf>>,

    /// Custom source directory (default: ~/.claude/)
    #[arg(long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Include MCP skills
    #[arg(long)]
    mcp: bool,

    /// Do not sync the hooks directory
    #[arg(long)]
    no_hooks: bool,

    /// Skip dependency bootstrap (venv, npm)
    #[arg(long)]
    no_deps: bool,

    /// Skip runtime verification
    #[arg(long)]
    no_verify: bool,

    /// Show what would be done without making changes
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show debug diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Destination for global scope
    #[arg(long, value_name = "DIR", env = CODEX_HOME_ENV)]
    codex_home: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    output::init_color();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<SyncError>() {
            Some(sync_err) => {
                eprintln!("{} {}", "error:".red().bold(), sync_err);
                ExitCode::from(SYNC_ERROR_EXIT_CODE)
            }
            None => {
                eprintln!("{} {:#}", "error:".red().bold(), err);
                ExitCode::FAILURE
            }
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = env::current_dir().context("Failed to read the current directory")?;
    let scope = if cli.global {
        Scope::Global
    } else {
        Scope::Project
    };
    let source = match cli.zip {
        Some(zip) => SourceSpec::Zip(zip),
        None => SourceSpec::Live(cli.source),
    };

    let config = RunConfig {
        scope,
        codex_home: resolve_codex_home(scope, cli.codex_home.as_deref(), &cwd)?,
        source,
        fresh: cli.fresh,
        force: cli.force,
        include_mcp: cli.mcp,
        include_hooks: !cli.no_hooks,
        bootstrap: !cli.no_deps,
        verify: !cli.no_verify,
        dry_run: cli.dry_run,
        ..RunConfig::new(cwd)
    };

    let summary = pipeline::run(&config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{}", "done: ckc-sync completed".green().bold());
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
