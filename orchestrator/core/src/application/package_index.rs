// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Package Index (spec.md §4.6): a lazily-loaded, on-disk cache of every
//! enabled registry's package listing, refreshed through the Failover
//! Manager so one bad registry can't abort a whole refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::index::{IndexError, PackageIndexState, PackageSearchResult, RegistryIndexEntry, SearchFilter};
use crate::domain::package::{InstalledPackagesFile, PackageMetadata};
use crate::domain::registry_config::RegistryConfig;
use crate::infrastructure::registry_http::RegistryHttpClient;

use super::failover::FailoverManager;

pub struct PackageIndexService {
    path: PathBuf,
    http: Arc<RegistryHttpClient>,
    failover: Arc<FailoverManager>,
    state: RwLock<Option<PackageIndexState>>,
}

impl PackageIndexService {
    pub fn new(path: impl Into<PathBuf>, http: Arc<RegistryHttpClient>, failover: Arc<FailoverManager>) -> Self {
        Self { path: path.into(), http, failover, state: RwLock::new(None) }
    }

    async fn ensure_loaded(&self) -> Result<(), IndexError> {
        if self.state.read().await.is_some() {
            return Ok(());
        }
        let mut guard = self.state.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let loaded = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PackageIndexState::default(),
            Err(e) => return Err(e.into()),
        };
        *guard = Some(loaded);
        Ok(())
    }

    async fn persist(&self, state: &PackageIndexState) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Refresh every enabled registry (or just `only`, if given). Only
    /// commits the in-memory/on-disk index when at least one registry
    /// succeeded; otherwise keeps the previous index and raises.
    pub async fn refresh(&self, registries: &[RegistryConfig], only: Option<&str>) -> Result<(), IndexError> {
        self.ensure_loaded().await?;
        let targets: Vec<&RegistryConfig> = registries
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| only.is_none_or(|name| r.name == name))
            .collect();

        let mut fetched: Vec<(String, RegistryIndexEntry)> = Vec::new();
        let mut any_succeeded = false;
        for registry in &targets {
            let outcome = self
                .failover
                .execute_with_failover(std::slice::from_ref(registry), Duration::from_secs(30), |r| {
                    let http = self.http.clone();
                    async move { http.fetch_packages(r).await }
                })
                .await;
            match outcome {
                Ok(packages) => {
                    any_succeeded = true;
                    fetched.push((
                        registry.name.clone(),
                        RegistryIndexEntry { url: registry.url.clone(), packages, last_updated: Some(Utc::now()) },
                    ));
                }
                Err(e) => {
                    tracing::warn!(registry = %registry.name, error = %e, "registry refresh failed");
                }
            }
        }

        if !any_succeeded {
            return Err(IndexError::NoRegistrySucceeded);
        }

        let mut guard = self.state.write().await;
        let state = guard.get_or_insert_with(PackageIndexState::default);
        for (name, entry) in fetched {
            state.registries.insert(name, entry);
        }
        state.last_updated = Some(Utc::now());
        let snapshot = state.clone();
        drop(guard);
        self.persist(&snapshot).await
    }

    /// Substring match against name/description, package-type filter, tag
    /// intersection, annotated with local installation status.
    pub async fn search(&self, filter: &SearchFilter, installed: &InstalledPackagesFile) -> Result<Vec<PackageSearchResult>, IndexError> {
        self.ensure_loaded().await?;
        let guard = self.state.read().await;
        let state = guard.as_ref().expect("ensure_loaded populates state");
        Ok(state
            .all_packages()
            .filter(|p| filter.matches(p))
            .map(|p| annotate(p.clone(), installed))
            .collect())
    }

    /// First match across registries for `name` (and `version`, if given).
    pub async fn get_package(&self, name: &str, version: Option<&str>) -> Result<Option<PackageMetadata>, IndexError> {
        self.ensure_loaded().await?;
        let guard = self.state.read().await;
        let state = guard.as_ref().expect("ensure_loaded populates state");
        Ok(state
            .all_packages()
            .find(|p| p.name == name && version.is_none_or(|v| p.version == v))
            .cloned())
    }

    /// Local lookup first; if absent, a live search via the Failover
    /// Manager against every enabled registry.
    pub async fn get_package_with_failover(
        &self,
        name: &str,
        version: Option<&str>,
        registries: &[RegistryConfig],
    ) -> Result<PackageMetadata, IndexError> {
        if let Some(found) = self.get_package(name, version).await? {
            return Ok(found);
        }

        let result = self
            .failover
            .execute_with_failover(registries, Duration::from_secs(30), |r| {
                let http = self.http.clone();
                async move {
                    let packages = http.fetch_packages(r).await?;
                    packages
                        .into_iter()
                        .find(|p| p.name == name && version.is_none_or(|v| p.version == v))
                        .ok_or_else(|| "not present on this registry".to_string())
                }
            })
            .await;

        result.map_err(|_| IndexError::NotFound(name.to_string()))
    }
}

fn annotate(metadata: PackageMetadata, installed: &InstalledPackagesFile) -> PackageSearchResult {
    let record = installed.packages.get(&metadata.name);
    PackageSearchResult {
        installed: record.is_some(),
        installed_version: record.map(|r| r.version.clone()),
        metadata,
    }
}
