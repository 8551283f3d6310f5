// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Package management commands
//!
//! Packages (tool servers) are installed from multi-registry indices or a
//! local path, provisioned into containers, and tracked in a transaction log
//! that supports rollback on a failed install/update/remove.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_tool_orchestrator_sdk::InstallPackageRequest;

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

#[derive(Subcommand)]
pub enum PackageCommand {
    /// Search the package index
    Search {
        /// Free-text query
        #[arg(value_name = "QUERY")]
        query: Option<String>,
    },

    /// Install a package from a registry or a local path
    Install {
        /// Package name (registry install) or omitted with --local-path
        #[arg(value_name = "NAME")]
        name: Option<String>,

        /// Pin to a specific version
        #[arg(long)]
        version: Option<String>,

        /// Install from a local directory instead of a registry
        #[arg(long)]
        local_path: Option<PathBuf>,

        /// Skip the automatic rollback on a failed install
        #[arg(long)]
        no_rollback: bool,
    },

    /// Update an installed package to a specific version found in the index
    Update {
        /// Package name
        #[arg(value_name = "NAME")]
        name: String,

        /// Target version, must be present in the package index
        #[arg(long)]
        version: String,
    },

    /// Remove an installed package
    Remove {
        /// Package name
        #[arg(value_name = "NAME")]
        name: String,

        /// Remove even if other installed packages depend on it
        #[arg(long)]
        force: bool,
    },

    /// Refresh the local package index from configured registries
    Refresh {
        /// Refresh a single registry by name (default: all)
        #[arg(long)]
        registry: Option<String>,
    },

    /// Roll back a transaction (install/update/remove) by id
    Rollback {
        /// Transaction id
        #[arg(value_name = "TRANSACTION_ID")]
        transaction_id: String,
    },
}

pub async fn handle_command(command: PackageCommand, host: &str, port: u16) -> Result<()> {
    if !matches!(check_daemon_running(host, port).await, Ok(DaemonStatus::Running { .. })) {
        println!("{}", "package commands require the daemon to be running.".red());
        println!("run 'aegis daemon start' to start it.");
        return Ok(());
    }

    let client = DaemonClient::new(port)?;

    match command {
        PackageCommand::Search { query } => search(query, client).await,
        PackageCommand::Install { name, version, local_path, no_rollback } => {
            install(name, version, local_path, no_rollback, client).await
        }
        PackageCommand::Update { name, version } => update(name, version, client).await,
        PackageCommand::Remove { name, force } => remove(name, force, client).await,
        PackageCommand::Refresh { registry } => refresh(registry, client).await,
        PackageCommand::Rollback { transaction_id } => rollback(transaction_id, client).await,
    }
}

async fn search(query: Option<String>, client: DaemonClient) -> Result<()> {
    let results = client.search_packages(query.as_deref()).await.context("search failed")?;

    if results.is_empty() {
        println!("{}", "no packages matched.".yellow());
        return Ok(());
    }

    println!("{:<30} {:<12} {:<10} {}", "NAME", "VERSION", "INSTALLED", "DESCRIPTION");
    for result in results {
        let installed = if result.installed { "yes".green().to_string() } else { "no".dimmed().to_string() };
        println!(
            "{:<30} {:<12} {:<10} {}",
            result.metadata.name.bold(),
            result.metadata.version,
            installed,
            result.metadata.description.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

async fn install(
    name: Option<String>,
    version: Option<String>,
    local_path: Option<PathBuf>,
    no_rollback: bool,
    client: DaemonClient,
) -> Result<()> {
    let display_name = name.clone().or_else(|| local_path.as_ref().map(|p| p.display().to_string())).unwrap_or_default();
    println!("{} {}", "installing".cyan(), display_name.bold());

    let request = InstallPackageRequest {
        name: name.unwrap_or_default(),
        version,
        local_path: local_path.map(|p| p.display().to_string()),
        workflow_id: None,
        team_id: None,
        no_rollback,
    };

    let record = client.install_package(request).await.context("install failed")?;
    println!("{}", format!("✓ installed {} {}", record.name, record.version).green().bold());

    Ok(())
}

async fn update(name: String, version: String, client: DaemonClient) -> Result<()> {
    println!("{} {} {} {}", "updating".cyan(), name.bold(), "to".dimmed(), version);
    let record = client.update_package(&name, &version).await.context("update failed")?;
    println!("{}", format!("✓ updated {} to {}", record.name, record.version).green().bold());
    Ok(())
}

async fn remove(name: String, force: bool, client: DaemonClient) -> Result<()> {
    client.remove_package(&name, force).await.context("remove failed")?;
    println!("{}", format!("✓ removed {name}").green());
    Ok(())
}

async fn refresh(registry: Option<String>, client: DaemonClient) -> Result<()> {
    client.refresh_index(registry.as_deref()).await.context("refresh failed")?;
    println!("{}", "✓ package index refreshed".green());
    Ok(())
}

async fn rollback(transaction_id: String, client: DaemonClient) -> Result<()> {
    client.rollback_transaction(&transaction_id).await.context("rollback failed")?;
    println!("{}", format!("✓ rolled back transaction {transaction_id}").green());
    Ok(())
}
