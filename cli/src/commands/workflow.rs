// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow command implementations
//!
//! Workflows are YAML documents under the daemon's `workflows/{templates,custom}`
//! directories, interpreted as a typed-node DAG by the Workflow Execution Engine.
//!
//! # Commands
//!
//! - `aegis workflow list` - List workflows the daemon can run
//! - `aegis workflow run <name>` - Start an execution
//! - `aegis workflow status <execution-id>` - Fetch execution state once
//! - `aegis workflow logs <execution-id>` - Stream execution progress
//! - `aegis workflow cancel <execution-id>` - Request cooperative cancellation

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List workflows the daemon can run
    List,

    /// Start a workflow execution
    Run {
        /// Workflow name
        #[arg(value_name = "NAME")]
        name: String,

        /// Workflow input parameters (JSON object string)
        #[arg(long, short = 'i', value_name = "JSON")]
        input: Option<String>,

        /// Individual parameters (key=value, value parsed as JSON if possible)
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Stream progress until the execution finishes
        #[arg(long, short = 'f')]
        follow: bool,
    },

    /// Fetch an execution's current state
    Status {
        /// Execution ID
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: String,
    },

    /// Stream progress events for an execution
    Logs {
        /// Execution ID
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: String,

        /// Show failures only
        #[arg(short, long)]
        errors: bool,

        /// Print the full node-state snapshot on each event
        #[arg(short, long)]
        verbose: bool,
    },

    /// Request cancellation of a running execution
    Cancel {
        /// Execution ID
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: String,
    },
}

pub async fn handle_command(command: WorkflowCommand, _config_path: Option<PathBuf>, host: &str, port: u16) -> Result<()> {
    if !matches!(check_daemon_running(host, port).await, Ok(DaemonStatus::Running { .. })) {
        println!("{}", "workflow commands require the daemon to be running.".red());
        println!("run 'aegis daemon start' to start it.");
        return Ok(());
    }

    let client = DaemonClient::new(port)?;

    match command {
        WorkflowCommand::List => list_workflows(client).await,
        WorkflowCommand::Run { name, input, params, follow } => run_workflow(name, input, params, follow, client).await,
        WorkflowCommand::Status { execution_id } => show_status(execution_id, client).await,
        WorkflowCommand::Logs { execution_id, errors, verbose } => {
            stream_logs(execution_id, errors, verbose, client).await
        }
        WorkflowCommand::Cancel { execution_id } => cancel(execution_id, client).await,
    }
}

async fn list_workflows(client: DaemonClient) -> Result<()> {
    let workflows = client.list_workflows().await.context("failed to list workflows")?;

    if workflows.is_empty() {
        println!("{}", "no workflows registered.".yellow());
        return Ok(());
    }

    println!("{}", "registered workflows:".bold());
    for name in workflows {
        println!("  {}", name.green());
    }

    Ok(())
}

fn parse_params(input: Option<String>, params: Vec<String>) -> Result<std::collections::HashMap<String, serde_json::Value>> {
    let mut values = std::collections::HashMap::new();

    if let Some(json) = input {
        let parsed: serde_json::Value = serde_json::from_str(&json).context("invalid JSON input")?;
        if let Some(obj) = parsed.as_object() {
            values.extend(obj.clone());
        }
    }

    for param in params {
        let (key, value) = param.split_once('=').with_context(|| format!("invalid parameter '{param}', expected key=value"))?;
        let json_value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        values.insert(key.to_string(), json_value);
    }

    Ok(values)
}

async fn run_workflow(name: String, input: Option<String>, params: Vec<String>, follow: bool, client: DaemonClient) -> Result<()> {
    let values = parse_params(input, params)?;

    println!("{} {}", "starting workflow".cyan(), name.bold());

    let response = client.run_workflow(&name, values).await.context("failed to start workflow execution")?;

    println!("{}", format!("✓ execution accepted: {}", response.execution_id).green().bold());
    println!("  status: {}", response.status);
    println!("  view progress: aegis workflow logs {}", response.execution_id);

    if follow {
        println!();
        client.stream_execution(&response.execution_id, false, false).await.context("failed to stream execution progress")?;
    }

    Ok(())
}

async fn show_status(execution_id: String, client: DaemonClient) -> Result<()> {
    let result = client.get_execution(&execution_id).await.context("failed to fetch execution")?;
    println!("{}", serde_json::to_string_pretty(&result).context("failed to format execution")?);
    Ok(())
}

async fn stream_logs(execution_id: String, errors_only: bool, verbose: bool, client: DaemonClient) -> Result<()> {
    println!("{}", format!("streaming progress for {execution_id}...").dimmed());
    client.stream_execution(&execution_id, errors_only, verbose).await.context("failed to stream execution progress")
}

async fn cancel(execution_id: String, client: DaemonClient) -> Result<()> {
    client.cancel_execution(&execution_id).await.context("failed to cancel execution")?;
    println!("{}", format!("✓ cancellation requested for {execution_id}").green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_params_merges_json_input_with_key_value_overrides() {
        let values = parse_params(
            Some(r#"{"city": "Berlin", "units": "metric"}"#.to_string()),
            vec!["units=imperial".to_string(), "days=3".to_string()],
        )
        .unwrap();

        assert_eq!(values.get("city"), Some(&serde_json::json!("Berlin")));
        assert_eq!(values.get("units"), Some(&serde_json::json!("imperial")));
        assert_eq!(values.get("days"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn parse_params_treats_non_json_values_as_plain_strings() {
        let values = parse_params(None, vec!["name=not-json".to_string()]).unwrap();
        assert_eq!(values.get("name"), Some(&serde_json::json!("not-json")));
    }

    #[test]
    fn parse_params_rejects_a_parameter_without_an_equals_sign() {
        assert!(parse_params(None, vec!["malformed".to_string()]).is_err());
    }

    #[test]
    fn parse_params_rejects_invalid_json_input() {
        assert!(parse_params(Some("not json".to_string()), vec![]).is_err());
    }
}
