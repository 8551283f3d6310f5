// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # tool-orchestrator CLI
//!
//! The `aegis` binary drives the tool-orchestrator daemon: a Tool-Server
//! Session Manager, a Workflow Execution Engine, and a Package & Container
//! Lifecycle Manager behind one HTTP surface.
//!
//! ## Commands
//!
//! - `aegis daemon start|stop|status|install|uninstall` - daemon lifecycle
//! - `aegis workflow list|run|status|logs|cancel` - workflow executions
//! - `aegis package search|install|update|remove|refresh|rollback` - packages
//! - `aegis config show|validate|generate` - daemon configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

mod commands;
mod daemon;

use commands::{ConfigCommand, DaemonCommand, PackageCommand, WorkflowCommand};

/// tool-orchestrator CLI and daemon
#[derive(Parser)]
#[command(name = "aegis")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as the background daemon service
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to daemon configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AEGIS_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, global = true, env = "AEGIS_PORT", default_value = "7431")]
    port: u16,

    /// HTTP API host
    #[arg(long, global = true, env = "AEGIS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Workflow execution operations
    #[command(name = "workflow")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Package and container lifecycle operations
    #[command(name = "package")]
    Package {
        #[command(subcommand)]
        command: PackageCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if cli.daemon {
        info!("starting tool-orchestrator daemon");
        return daemon::start_daemon(cli.config, cli.port).await;
    }

    match cli.command {
        Some(Commands::Daemon { command }) => commands::daemon::handle_command(command, cli.config, &cli.host, cli.port).await,
        Some(Commands::Workflow { command }) => commands::workflow::handle_command(command, cli.config, &cli.host, cli.port).await,
        Some(Commands::Package { command }) => commands::package::handle_command(command, &cli.host, cli.port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "no command specified. use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_derive_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn workflow_run_parses_params_and_follow_flag() {
        let cli = Cli::parse_from([
            "aegis",
            "workflow",
            "run",
            "weather",
            "--param",
            "city=Berlin",
            "--follow",
        ]);
        match cli.command {
            Some(Commands::Workflow { command: WorkflowCommand::Run { name, params, follow, .. } }) => {
                assert_eq!(name, "weather");
                assert_eq!(params, vec!["city=Berlin".to_string()]);
                assert!(follow);
            }
            _ => panic!("expected a Workflow::Run subcommand"),
        }
    }
}
