// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with the daemon's REST surface. Thin
//! wrapper over `aegis_tool_orchestrator_sdk::OrchestratorClient` plus the
//! SSE progress stream, which the SDK doesn't expose because it has no
//! pretty-printing concerns.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio_stream::StreamExt;

use aegis_tool_orchestrator_core::domain::execution::ExecutionResult;
use aegis_tool_orchestrator_core::domain::index::PackageSearchResult;
use aegis_tool_orchestrator_core::domain::package::InstallationRecord;
use aegis_tool_orchestrator_sdk::{
    ExecuteWorkflowRequest, ExecuteWorkflowResponse, InstallPackageRequest, OrchestratorClient,
};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
    sdk: OrchestratorClient,
}

impl DaemonClient {
    pub fn new(port: u16) -> Result<Self> {
        let base_url = format!("http://localhost:{port}");
        // No global timeout: the progress stream is long-lived.
        let client = Client::builder().build().context("failed to create HTTP client")?;

        Ok(Self { client, base_url: base_url.clone(), sdk: OrchestratorClient::new(base_url) })
    }

    pub async fn list_workflows(&self) -> Result<Vec<String>> {
        self.sdk.list_workflows().await
    }

    pub async fn run_workflow(
        &self,
        name: &str,
        params: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<ExecuteWorkflowResponse> {
        self.sdk.execute_workflow(name, ExecuteWorkflowRequest { params }).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionResult> {
        self.sdk.get_execution(execution_id).await
    }

    pub async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        self.sdk.cancel_execution(execution_id).await
    }

    pub async fn list_recent_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>> {
        let url = format!("{}/executions/recent?limit={limit}", self.base_url);
        let response = self.client.get(&url).send().await.context("failed to list executions")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to list executions: {error_text}");
        }

        #[derive(Deserialize)]
        struct RecentResponse {
            executions: Vec<ExecutionResult>,
        }
        let body: RecentResponse = response.json().await.context("failed to parse executions response")?;
        Ok(body.executions)
    }

    pub async fn search_packages(&self, query: Option<&str>) -> Result<Vec<PackageSearchResult>> {
        self.sdk.search_packages(query).await
    }

    pub async fn install_package(&self, request: InstallPackageRequest) -> Result<InstallationRecord> {
        self.sdk.install_package(request).await
    }

    pub async fn update_package(&self, name: &str, version: &str) -> Result<InstallationRecord> {
        self.sdk.update_package(name, version).await
    }

    pub async fn remove_package(&self, name: &str, force: bool) -> Result<()> {
        self.sdk.remove_package(name, force).await
    }

    pub async fn refresh_index(&self, registry: Option<&str>) -> Result<()> {
        self.sdk.refresh_index(registry).await
    }

    pub async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        self.sdk.rollback_transaction(transaction_id).await
    }

    /// Stream `NodeStateChanged`/`ExecutionFinished` progress events for a
    /// running execution until the server closes the connection (after
    /// `ExecutionFinished`, see `presentation::api::stream_execution`).
    pub async fn stream_execution(&self, execution_id: &str, errors_only: bool, verbose: bool) -> Result<()> {
        let url = format!("{}/executions/{execution_id}/stream", self.base_url);

        let response = self.client.get(&url).send().await.context("failed to connect to progress stream")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to stream execution: {error_text}");
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("failed to read progress stream chunk")?;
            let text = String::from_utf8_lossy(&chunk);

            for line in text.lines() {
                if let Some(json_str) = line.strip_prefix("data: ") {
                    if let Ok(event) = serde_json::from_str::<serde_json::Value>(json_str) {
                        if errors_only && !is_error_event(&event) {
                            continue;
                        }
                        print_event(&event, verbose);
                    }
                }
            }
        }

        Ok(())
    }
}

fn is_error_event(event: &serde_json::Value) -> bool {
    matches!(event["status"].as_str(), Some("Error") | Some("Failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_error_event_matches_error_and_failed_statuses_only() {
        assert!(is_error_event(&json!({"status": "Error"})));
        assert!(is_error_event(&json!({"status": "Failed"})));
        assert!(!is_error_event(&json!({"status": "Completed"})));
        assert!(!is_error_event(&json!({"status": "Running"})));
        assert!(!is_error_event(&json!({})));
    }

    #[tokio::test]
    async fn list_workflows_delegates_to_the_sdk_client() {
        let mut server = mockito::Server::new_async().await;
        let port = server.host_with_port().split(':').next_back().unwrap().parse().unwrap();
        server
            .mock("GET", "/workflows")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"workflows": ["deploy"]}"#)
            .create_async()
            .await;

        let client = DaemonClient::new(port).unwrap();
        let names = client.list_workflows().await.unwrap();
        assert_eq!(names, vec!["deploy".to_string()]);
    }
}

fn print_event(event: &serde_json::Value, verbose: bool) {
    use colored::Colorize;

    let event_type = event["type"].as_str().unwrap_or("Unknown");
    let at = event["at"].as_str().unwrap_or("");

    match event_type {
        "NodeStateChanged" => {
            let node_id = event["node_id"].as_str().unwrap_or("?");
            let status = event["status"].as_str().unwrap_or("?");
            let colored_status = match status {
                "Completed" => status.green(),
                "Error" => status.red().bold(),
                "Running" => status.yellow(),
                "Skipped" => status.dimmed(),
                other => other.normal(),
            };

            if verbose {
                println!(
                    "{} {} {} {}\n{}",
                    format!("[{at}]").dimmed(),
                    "node".cyan(),
                    node_id,
                    colored_status,
                    serde_json::to_string_pretty(&event["node_states_snapshot"]).unwrap_or_default().dimmed(),
                );
            } else {
                println!("{} {} {} {}", format!("[{at}]").dimmed(), "node".cyan(), node_id, colored_status);
            }
        }
        "ExecutionFinished" => {
            let status = event["status"].as_str().unwrap_or("?");
            let label = match status {
                "Completed" => "execution completed".green().bold(),
                "Failed" => "execution failed".red().bold(),
                "Cancelled" => "execution cancelled".yellow().bold(),
                other => other.normal(),
            };
            println!("{} {}", format!("[{at}]").dimmed(), label);
        }
        _ => {
            if event_type != "Unknown" {
                println!("{} {} {}", format!("[{at}]").dimmed(), event_type.cyan(), event);
            }
        }
    }
}
