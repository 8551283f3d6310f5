// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_tool_orchestrator_core::infrastructure::config::DaemonConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective daemon configuration
    Show {
        /// Show the config file path checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate a daemon config file
    Validate {
        /// Path to config file (default: configs/daemon.yaml)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a sample daemon configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./configs/daemon.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let path = config_override.clone().unwrap_or_else(|| PathBuf::from("configs/daemon.yaml"));
    let config = DaemonConfig::load(&path).await.context("failed to load daemon config")?;

    if show_paths {
        println!("{}", "Configuration path checked:".bold());
        println!("  {}", path.display());
        println!();
    }

    println!("{}", "Daemon configuration:".bold());
    println!("  host:                            {}", config.host);
    println!("  port:                            {}", config.port);
    println!("  data_dir:                        {}", config.data_dir.display());
    println!("  log_level:                       {}", config.log_level);
    println!("  registries_path:                 {}", config.registries_path.display());
    println!("  registry_circuit_cooldown_secs:  {}", config.registry_circuit_cooldown_secs);
    println!(
        "  self_container_name:             {}",
        config.self_container_name.as_deref().unwrap_or("(none)")
    );

    Ok(())
}

async fn validate(file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| PathBuf::from("configs/daemon.yaml"));

    match DaemonConfig::load(&path).await {
        Ok(_) => {
            println!("{} {}", "✓".green().bold(), format!("{} is valid", path.display()));
            Ok(())
        }
        Err(e) => {
            println!("{} {}: {}", "✗".red().bold(), path.display(), e);
            Err(e.into())
        }
    }
}

async fn generate(output: PathBuf) -> Result<()> {
    let config = DaemonConfig::default();
    let yaml = serde_yaml::to_string(&config).context("failed to serialize sample config")?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&output, yaml).with_context(|| format!("failed to write {}", output.display()))?;

    println!("{} {}", "✓".green().bold(), format!("wrote sample config to {}", output.display()));
    Ok(())
}
