// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use reqwest::Client;

use crate::types::{
    ExecuteWorkflowRequest, ExecuteWorkflowResponse, ExecutionResult, InstallPackageRequest,
    InstallationRecord, PackageSearchResult, UpdatePackageRequest,
};

/// HTTP client for the orchestrator daemon's REST surface (spec.md §6).
/// Multi-tenant authentication is explicitly out of scope, so this talks to
/// a single trusted daemon instance over a bare base URL.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: Client::new() }
    }

    /// List workflow names available under `workflows/{templates,custom}`.
    pub async fn list_workflows(&self) -> Result<Vec<String>> {
        let url = format!("{}/workflows", self.base_url);
        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;
        let names = body
            .get("workflows")
            .and_then(|v| v.as_array())
            .context("malformed /workflows response")?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(names)
    }

    /// Start a workflow execution. Returns immediately with an execution id;
    /// poll [`Self::get_execution`] or stream progress over SSE separately.
    pub async fn execute_workflow(&self, name: &str, request: ExecuteWorkflowRequest) -> Result<ExecuteWorkflowResponse> {
        let url = format!("{}/workflows/{name}/executions", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?.json().await?;
        Ok(response)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionResult> {
        let url = format!("{}/executions/{execution_id}", self.base_url);
        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;
        let execution = body.get("execution").context("execution not found")?;
        Ok(serde_json::from_value(execution.clone())?)
    }

    pub async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let url = format!("{}/executions/{execution_id}/cancel", self.base_url);
        self.client.post(&url).send().await?;
        Ok(())
    }

    pub async fn search_packages(&self, query: Option<&str>) -> Result<Vec<PackageSearchResult>> {
        let url = format!("{}/packages/search", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let body: serde_json::Value = request.send().await?.json().await?;
        let packages = body.get("packages").context("malformed /packages/search response")?;
        Ok(serde_json::from_value(packages.clone())?)
    }

    pub async fn install_package(&self, request: InstallPackageRequest) -> Result<InstallationRecord> {
        let url = format!("{}/packages/install", self.base_url);
        let body: serde_json::Value = self.client.post(&url).json(&request).send().await?.json().await?;
        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            anyhow::bail!("install failed: {error}");
        }
        let installed = body.get("installed").context("malformed install response")?;
        Ok(serde_json::from_value(installed.clone())?)
    }

    pub async fn update_package(&self, name: &str, version: &str) -> Result<InstallationRecord> {
        let url = format!("{}/packages/{name}/update", self.base_url);
        let body: serde_json::Value =
            self.client.post(&url).json(&UpdatePackageRequest { version: version.to_string() }).send().await?.json().await?;
        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            anyhow::bail!("update failed: {error}");
        }
        let updated = body.get("updated").context("malformed update response")?;
        Ok(serde_json::from_value(updated.clone())?)
    }

    pub async fn remove_package(&self, name: &str, force: bool) -> Result<()> {
        let url = format!("{}/packages/{name}", self.base_url);
        self.client.delete(&url).query(&[("force", force.to_string())]).send().await?;
        Ok(())
    }

    pub async fn refresh_index(&self, registry: Option<&str>) -> Result<()> {
        let url = format!("{}/packages/refresh", self.base_url);
        let payload = serde_json::json!({ "registry": registry });
        self.client.post(&url).json(&payload).send().await?;
        Ok(())
    }

    pub async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let url = format!("{}/transactions/{transaction_id}/rollback", self.base_url);
        self.client.post(&url).send().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn list_workflows_extracts_names_from_the_workflows_array() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/workflows")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"workflows": ["deploy", "rollback"]}"#)
            .create_async()
            .await;

        let client = OrchestratorClient::new(server.url());
        let names = client.list_workflows().await.unwrap();

        mock.assert_async().await;
        assert_eq!(names, vec!["deploy".to_string(), "rollback".to_string()]);
    }

    #[tokio::test]
    async fn get_execution_errors_when_the_execution_key_is_absent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/executions/missing")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "execution not found"}"#)
            .create_async()
            .await;

        let client = OrchestratorClient::new(server.url());
        let result = client.get_execution("missing").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn install_package_surfaces_a_server_reported_error_as_a_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/packages/install")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "package not found in index: weather-tool"}"#)
            .create_async()
            .await;

        let client = OrchestratorClient::new(server.url());
        let request = InstallPackageRequest { name: "weather-tool".to_string(), ..Default::default() };
        let result = client.install_package(request).await;

        let error = result.expect_err("server-reported error should surface as Err");
        assert!(error.to_string().contains("not found in index"));
    }

    #[tokio::test]
    async fn search_packages_deserialises_the_packages_array() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/packages/search")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"packages": []}"#)
            .create_async()
            .await;

        let client = OrchestratorClient::new(server.url());
        let results = client.search_packages(None).await.unwrap();
        assert!(results.is_empty());
    }
}
