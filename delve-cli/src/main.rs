//! Delve CLI: terminal front end for guided research sessions.
//!
//! Runs an interactive REPL by default; subcommands list sessions, show the
//! daily quota and manage configuration.

mod commands;
mod console;
mod repl;

use clap::Parser;
use delve_core::config::LoggingConfig;
use delve_core::error::{ConfigError, DelveError};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delve: guided research with clarifying questions and multi-provider reports
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (for `.delve/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Research API base URL (overrides configuration)
    #[arg(long)]
    base_url: Option<String>,

    /// Open an existing session instead of starting a new one
    #[arg(long)]
    session: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List stored research sessions
    Sessions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show today's session allowance
    Quota,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
    /// Check configuration for problems
    Validate,
}

/// Install the stderr layer and, when enabled, the daily JSON file layer.
fn init_tracing(logging: &LoggingConfig, verbose: u8, quiet: bool) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 if quiet => "error".to_string(),
        0 => std::env::var("RUST_LOG").unwrap_or_else(|_| logging.level.clone()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    if !logging.json_file {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Some(guard)
}

fn resolve_workspace(path: &Path) -> PathBuf {
    path.canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let workspace = resolve_workspace(&cli.workspace);

    let mut config = delve_core::load_config(Some(&workspace), None).map_err(|e| {
        DelveError::from(ConfigError::ParseError {
            message: e.to_string(),
        })
    })?;
    if let Some(base_url) = &cli.base_url {
        config.backend.base_url = base_url.clone();
    }

    let _guard = init_tracing(&config.logging, cli.verbose, cli.quiet);
    tracing::debug!(
        workspace = %workspace.display(),
        base_url = %config.backend.base_url,
        "Configuration loaded"
    );

    // `config validate` and friends must run against a broken configuration.
    if !matches!(cli.command, Some(Commands::Config { .. })) {
        config.ensure_valid()?;
    }

    if let Some(command) = cli.command {
        return commands::handle_command(command, &config, &workspace).await;
    }

    repl::run_interactive(config, cli.session).await
}
