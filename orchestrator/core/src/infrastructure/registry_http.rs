// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fetches package listings from a registry, either over HTTP
//! (`GET {url}/api/v2/packages`) or by scanning a `file://` directory of
//! package subdirectories, each containing an `mcp.json` (spec.md §4.6).

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::fs;

use crate::domain::package::PackageMetadata;
use crate::domain::registry_config::RegistryConfig;

#[derive(Debug, Error)]
pub enum RegistryFetchError {
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },
    #[error("registry returned malformed package list: {0}")]
    Malformed(String),
    #[error("file registry path is not a directory: {0}")]
    NotADirectory(PathBuf),
}

pub struct RegistryHttpClient {
    http: Client,
    timeout: Duration,
}

impl RegistryHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { http: Client::builder().build().expect("reqwest client builder"), timeout }
    }

    /// Fetch the full package listing for one registry.
    pub async fn fetch_packages(&self, registry: &RegistryConfig) -> Result<Vec<PackageMetadata>, RegistryFetchError> {
        if registry.is_file() {
            self.scan_file_registry(registry).await
        } else {
            self.fetch_http_registry(registry).await
        }
    }

    async fn fetch_http_registry(&self, registry: &RegistryConfig) -> Result<Vec<PackageMetadata>, RegistryFetchError> {
        let url = format!("{}/api/v2/packages", registry.url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RegistryFetchError::Http { url: url.clone(), reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(RegistryFetchError::Http { url, reason: format!("HTTP {}", response.status()) });
        }

        response
            .json::<Vec<PackageMetadata>>()
            .await
            .map_err(|e| RegistryFetchError::Malformed(e.to_string()))
    }

    /// `/health` probe used by the Failover Manager's proactive sweep
    /// (SPEC_FULL §D, `run_health_checks`).
    pub async fn check_health(&self, registry: &RegistryConfig) -> Result<(), RegistryFetchError> {
        if registry.is_file() {
            let dir = file_registry_path(registry);
            if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Ok(());
            }
            return Err(RegistryFetchError::NotADirectory(dir));
        }
        let url = format!("{}/health", registry.url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RegistryFetchError::Http { url: url.clone(), reason: e.to_string() })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryFetchError::Http { url, reason: format!("HTTP {}", response.status()) })
        }
    }

    async fn scan_file_registry(&self, registry: &RegistryConfig) -> Result<Vec<PackageMetadata>, RegistryFetchError> {
        let dir = file_registry_path(registry);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|_| RegistryFetchError::NotADirectory(dir.clone()))?;

        let mut packages = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let manifest_path = entry.path().join("mcp.json");
            if let Ok(contents) = fs::read_to_string(&manifest_path).await {
                match serde_json::from_str::<PackageMetadata>(&contents) {
                    Ok(meta) => packages.push(meta),
                    Err(e) => {
                        tracing::warn!(path = %manifest_path.display(), error = %e, "skipping malformed package manifest");
                    }
                }
            }
        }
        Ok(packages)
    }
}

fn file_registry_path(registry: &RegistryConfig) -> PathBuf {
    PathBuf::from(registry.url.trim_start_matches("file://"))
}

/// Scan a directory for subdirectories containing `mcp.json` without
/// installing anything (SPEC_FULL §D, `discover_local_packages`).
pub async fn discover_local_packages(directory: &std::path::Path) -> Result<Vec<PackageMetadata>, RegistryFetchError> {
    let mut entries = fs::read_dir(directory)
        .await
        .map_err(|_| RegistryFetchError::NotADirectory(directory.to_path_buf()))?;
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let manifest_path = entry.path().join("mcp.json");
        if let Ok(contents) = fs::read_to_string(&manifest_path).await {
            if let Ok(meta) = serde_json::from_str::<PackageMetadata>(&contents) {
                found.push(meta);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_registry(dir: &std::path::Path) -> RegistryConfig {
        RegistryConfig {
            name: "local".to_string(),
            url: format!("file://{}", dir.display()),
            enabled: true,
            priority: 0,
            gpgcheck: false,
            gpgkey: None,
            trust_level: "community".to_string(),
            registry_type: "file".to_string(),
        }
    }

    fn write_manifest(registry_dir: &std::path::Path, name: &str) {
        let pkg_dir = registry_dir.join(name);
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let manifest = serde_json::json!({"name": name, "version": "1.0.0", "type": "mcp"});
        std::fs::write(pkg_dir.join("mcp.json"), serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn fetch_packages_scans_a_file_registry_and_skips_malformed_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "weather-tool");
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken").join("mcp.json"), b"not json").unwrap();

        let client = RegistryHttpClient::new(Duration::from_secs(5));
        let packages = client.fetch_packages(&file_registry(dir.path())).await.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "weather-tool");
    }

    #[tokio::test]
    async fn check_health_fails_when_the_file_registry_directory_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let client = RegistryHttpClient::new(Duration::from_secs(5));
        let result = client.check_health(&file_registry(&missing)).await;
        assert!(matches!(result, Err(RegistryFetchError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn check_health_succeeds_when_the_file_registry_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let client = RegistryHttpClient::new(Duration::from_secs(5));
        client.check_health(&file_registry(dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn discover_local_packages_finds_every_manifest_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "a");
        write_manifest(dir.path(), "b");
        let found = discover_local_packages(dir.path()).await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
