//! bundlepatch command-line interface.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use bundlepatch::config::{default_config_path, default_data_dir};
use bundlepatch::logging::{init_logging, LoggingGuard};
use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::common::SyncArgs;
use commands::publish::{CleanArgs, PublishArgs};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "bundlepatch", version, about = "Content-addressed patch sync for asset bundles")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file [default: ~/.bundlepatch/config.ini]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for rolling log files [default: ~/.bundlepatch/logs]
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download changed bundles into the patch cache
    Sync(SyncArgs),

    /// Show what a sync would download without downloading
    Plan(SyncArgs),

    /// Manage the patch cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Publish a directory of built bundles as a new release
    Publish(PublishArgs),

    /// Delete release directories superseded by versions.ini
    CleanReleases(CleanArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _guard = start_logging(&cli)?;
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Sync(args) => commands::sync::run(args, &config_path),
        Commands::Plan(args) => commands::plan::run(args, &config_path),
        Commands::Cache { action } => commands::cache::run(action, &config_path),
        Commands::Publish(args) => commands::publish::run(args),
        Commands::CleanReleases(args) => commands::publish::clean(args),
    }
}

fn start_logging(cli: &Cli) -> Result<LoggingGuard, CliError> {
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| default_data_dir().join("logs"));
    Ok(init_logging(Some(&log_dir), cli.verbose)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::parse_from([
            "bundlepatch",
            "sync",
            "--url",
            "https://cdn.example.com",
            "--platform",
            "ios",
            "--variant",
            "fr",
            "--variant",
            "en",
            "-j",
            "2",
        ]);
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.platform, Some(bundlepatch::Platform::Ios));
        assert_eq!(args.variants, vec!["fr", "en"]);
        assert_eq!(args.concurrency, Some(2));
    }

    #[test]
    fn test_parse_cache_clear_yes() {
        let cli = Cli::parse_from(["bundlepatch", "cache", "clear", "--yes"]);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Clear { yes: true }
            }
        ));
    }
}
