// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle management commands
//!
//! Commands: start, stop, status, install, uninstall

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::daemon::{check_daemon_running, stop_daemon, DaemonStatus};
use aegis_tool_orchestrator_core::infrastructure::config::DaemonConfig;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon (if not already running)
    Start,

    /// Stop the daemon gracefully
    Stop {
        /// Force kill if daemon doesn't stop gracefully
        #[arg(short, long)]
        force: bool,

        /// Timeout in seconds (default: 30)
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Check daemon status
    Status,

    /// Install daemon as system service
    Install {
        /// Binary path (default: current executable)
        #[arg(long)]
        binary_path: Option<PathBuf>,

        /// User to run as (Unix only)
        #[arg(long)]
        user: Option<String>,
    },

    /// Uninstall system service
    Uninstall,
}

pub async fn handle_command(command: DaemonCommand, config_path: Option<PathBuf>, host: &str, port: u16) -> Result<()> {
    match command {
        DaemonCommand::Start => start(config_path, port).await,
        DaemonCommand::Stop { force, timeout } => stop(host, port, force, timeout).await,
        DaemonCommand::Status => status(host, port).await,
        DaemonCommand::Install { binary_path, user } => install(binary_path, user).await,
        DaemonCommand::Uninstall => uninstall().await,
    }
}

async fn start(config_path: Option<PathBuf>, port: u16) -> Result<()> {
    let load_path = config_path.clone().unwrap_or_else(|| PathBuf::from("configs/daemon.yaml"));
    let config = DaemonConfig::load(&load_path).await.context("failed to load daemon config")?;

    info!("checking if daemon is already running...");

    match check_daemon_running(&config.host, port).await {
        Ok(DaemonStatus::Running { pid, .. }) => {
            println!("{}", format!("✓ daemon already running (PID: {pid})").green());
            println!("use 'aegis daemon stop' to stop it first.");
            return Ok(());
        }
        Ok(DaemonStatus::Stopped) => {
            info!("daemon not running, starting...");
        }
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            warn!("daemon PID {pid} exists but unhealthy ({error}), stopping...");
            stop_daemon(false, 10).await?;
        }
        Err(e) => {
            warn!("failed to check daemon status: {e}");
        }
    }

    let current_exe = std::env::current_exe().context("failed to get current executable path")?;

    let mut cmd = std::process::Command::new(current_exe);
    cmd.arg("--daemon");
    cmd.arg("--port").arg(port.to_string());

    if let Some(config_path) = config_path {
        cmd.arg("--config").arg(config_path);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let temp_dir = std::env::temp_dir();
    let stdout_path = temp_dir.join("aegis.out");
    let stderr_path = temp_dir.join("aegis.err");

    let stdout_file = std::fs::File::create(&stdout_path).context("failed to create stdout log file")?;
    let stderr_file = std::fs::File::create(&stderr_path).context("failed to create stderr log file")?;

    cmd.stdin(std::process::Stdio::null()).stdout(stdout_file).stderr(stderr_file);

    println!("redirecting logs to: {}", stdout_path.display());

    let child = cmd.spawn().context("failed to spawn daemon process")?;

    println!("{}", format!("✓ daemon starting (PID: {})", child.id()).green());
    println!("check status with: aegis daemon status");

    Ok(())
}

async fn stop(host: &str, port: u16, force: bool, timeout: u64) -> Result<()> {
    info!("stopping daemon...");

    match check_daemon_running(host, port).await {
        Ok(DaemonStatus::Stopped) => {
            println!("{}", "daemon not running".yellow());
            return Ok(());
        }
        Ok(DaemonStatus::Running { pid, .. }) | Ok(DaemonStatus::Unhealthy { pid, .. }) => {
            println!("stopping daemon (PID: {pid})...");
            stop_daemon(force, timeout).await?;
            println!("{}", "✓ daemon stopped".green());
        }
        Err(e) => {
            println!("{}", format!("✗ failed to check daemon: {e}").red());
            return Err(e);
        }
    }

    Ok(())
}

async fn status(host: &str, port: u16) -> Result<()> {
    match check_daemon_running(host, port).await {
        Ok(DaemonStatus::Running { pid, uptime }) => {
            println!("{}", "✓ daemon is running".green());
            println!("  PID: {pid}");
            if let Some(uptime) = uptime {
                println!("  uptime: {}", format_duration(uptime));
            }
        }
        Ok(DaemonStatus::Stopped) => {
            println!("{}", "✗ daemon is not running".red());
        }
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            println!("{}", format!("⚠ daemon unhealthy (PID: {pid})").yellow());
            println!("  process exists but HTTP API check failed: {error}");
            println!("  check logs at /tmp/aegis.out and /tmp/aegis.err");
        }
        Err(e) => {
            println!("{}", format!("✗ failed to check status: {e}").red());
            return Err(e);
        }
    }

    Ok(())
}

async fn install(binary_path: Option<PathBuf>, user: Option<String>) -> Result<()> {
    #[cfg(unix)]
    {
        crate::daemon::install::install_service(binary_path, user).await
    }

    #[cfg(windows)]
    {
        let _ = (binary_path, user);
        anyhow::bail!("Windows service installation not yet implemented")
    }
}

async fn uninstall() -> Result<()> {
    #[cfg(unix)]
    {
        crate::daemon::install::uninstall_service().await
    }

    #[cfg(windows)]
    {
        anyhow::bail!("Windows service uninstallation not yet implemented")
    }
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_shows_only_the_coarsest_two_units() {
        assert_eq!(format_duration(45), "0m");
        assert_eq!(format_duration(125), "2m");
        assert_eq!(format_duration(3_725), "1h 2m");
        assert_eq!(format_duration(90_125), "1d 1h 2m");
    }
}
