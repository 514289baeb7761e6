//! Tributary Daemon - Idempotent incremental file ingestion
//!
//! Polls the configured directories, SFTP servers and S3 buckets, tails the
//! configured files, and writes every accepted entry to stdout as one JSON
//! line. Which entry versions were already emitted is recorded in the
//! configured cursor store, so a restart never re-emits them.
//!
//! # Commands
//!
//! - `run` (default) polls until SIGINT/SIGTERM; `run --once` runs a single
//!   cycle per source and exits
//! - `validate` checks the configuration, including backends and protocols
//!   that were not compiled in
//! - `cursor get|put|remove` inspects or edits cursor records by key

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tributary_core::config::{Config, LoggingConfig};

mod service;
mod sink;

use service::IngestService;

#[derive(Debug, Parser)]
#[command(name = "tributaryd", version, about = "Idempotent incremental file ingestion")]
struct Cli {
    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the configured sources until interrupted
    Run {
        /// Run a single poll cycle per source, then exit
        #[arg(long)]
        once: bool,
        /// Only run the named source (can be repeated)
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Validate the configuration file
    Validate,
    /// Inspect or edit cursor records
    #[command(subcommand)]
    Cursor(CursorCommand),
}

#[derive(Debug, Subcommand)]
enum CursorCommand {
    /// Print the marker stored under a key
    Get { key: String },
    /// Store a marker under a key
    Put { key: String, value: String },
    /// Forget a key so its entry is emitted again
    Remove { key: String },
}

// ============================================================================
// Logging
// ============================================================================

/// Installs the global subscriber; logs go to stderr
///
/// `RUST_LOG` wins over `-v`, which wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Signal handling
// ============================================================================

/// Cancels `token` on SIGINT or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

// ============================================================================
// Commands
// ============================================================================

fn load_config(path: Option<PathBuf>) -> Result<(PathBuf, Config)> {
    let path = path.unwrap_or_else(Config::default_path);
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((path, config))
}

async fn run(config: Config, once: bool, sources: &[String]) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let service = IngestService::new(config, shutdown).await?;
    if once {
        let accepted = service.run_once(sources).await?;
        info!(accepted, "Single cycle complete");
        return Ok(());
    }

    info!("Tributary daemon started");
    let result = service.run(sources).await;
    match &result {
        Ok(()) => info!("Tributary daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Tributary daemon exiting with error"),
    }
    result
}

fn validate(path: &std::path::Path, config: &Config) -> Result<()> {
    let errors = service::validate(config);
    if errors.is_empty() {
        println!("{}: ok ({} source(s))", path.display(), config.sources.len());
        return Ok(());
    }
    for e in &errors {
        println!("{e}");
    }
    bail!("{} validation error(s) in {}", errors.len(), path.display())
}

async fn cursor(config: Config, command: CursorCommand) -> Result<()> {
    let service = IngestService::new(config, CancellationToken::new()).await?;
    let store = service.store();
    match command {
        CursorCommand::Get { key } => match store.get(&key).await? {
            Some(value) => println!("{value}"),
            None => bail!("No cursor record for '{key}'"),
        },
        CursorCommand::Put { key, value } => {
            store.put(&key, &value).await?;
            info!(key = %key, value = %value, "Cursor record stored");
        }
        CursorCommand::Remove { key } => match store.remove(&key).await? {
            Some(previous) => info!(key = %key, previous = %previous, "Cursor record removed"),
            None => warn!(key = %key, "No cursor record to remove"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (path, config) = load_config(cli.config)?;
    init_tracing(&config.logging, cli.verbose);
    info!(config_path = %path.display(), "Loaded configuration");

    match cli.command.unwrap_or(Commands::Run {
        once: false,
        sources: Vec::new(),
    }) {
        Commands::Run { once, sources } => run(config, once, &sources).await,
        Commands::Validate => validate(&path, &config),
        Commands::Cursor(command) => cursor(config, command).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_once_with_sources() {
        let cli = Cli::parse_from(["tributaryd", "run", "--once", "--source", "a", "--source", "b"]);
        match cli.command {
            Some(Commands::Run { once, sources }) => {
                assert!(once);
                assert_eq!(sources, ["a", "b"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_cursor_put() {
        let cli = Cli::parse_from(["tributaryd", "--config", "/tmp/t.yaml", "cursor", "put", "k", "1"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.yaml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Cursor(CursorCommand::Put { ref key, ref value })) if key == "k" && value == "1"
        ));
    }

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::parse_from(["tributaryd"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_validate_reports_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: loud\n").unwrap();

        let (_, config) = load_config(Some(path.clone())).unwrap();
        assert!(validate(&path, &config).is_err());
    }
}
