// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry Service (spec.md §4.10): the user-facing composition root for
//! package lifecycle operations. Orchestrates the Package Index, Failover
//! Manager, Dependency Resolver, Container Manager, Transaction Log and
//! (optionally) GPG verification behind `refresh_index`/`search`/`install`/
//! `update`/`remove`/`rollback`/`install_from_local_path`/
//! `discover_local_packages`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::index::{IndexError, PackageSearchResult, SearchFilter};
use crate::domain::package::{
    InstallUserConfig, InstallationRecord, InstalledPackagesFile, PackageError, PackageMetadata,
};
use crate::domain::registry_config::RegistryConfig;
use crate::domain::repository::{InstalledPackagesRepository, RepositoryError, TransactionRepository};
use crate::domain::transaction::{BackupState, ContainerStateSnapshot, TransactionOperation, TransactionRecord};
use crate::infrastructure::container::{ContainerManager, ContainerRuntimeError, InstallOutcome};
use crate::infrastructure::gpg::{GpgVerifier, SignatureVerificationError};
use crate::infrastructure::registry_http::discover_local_packages as scan_local_packages;
use crate::infrastructure::tool_descriptor_registry::ToolDescriptorRegistry;
use crate::domain::mcp::ToolServerInfo;

use super::dependency_resolver::{DependencyError, DependencyResolver};
use super::package_index::PackageIndexService;

#[derive(Debug, Error)]
pub enum RegistryServiceError {
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Container(#[from] ContainerRuntimeError),
    #[error(transparent)]
    Signature(#[from] SignatureVerificationError),
    #[error("{0} is still depended on by {1}")]
    HasDependents(String, String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RegistryServiceError {
    fn from(e: std::io::Error) -> Self {
        RegistryServiceError::Io(e.to_string())
    }
}

pub struct InstallOptions {
    pub user_config: InstallUserConfig,
    pub local_path: Option<std::path::PathBuf>,
    pub no_rollback: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self { user_config: InstallUserConfig::default(), local_path: None, no_rollback: false }
    }
}

pub struct RegistryService {
    packages_repo: Arc<dyn InstalledPackagesRepository>,
    transactions: Arc<dyn TransactionRepository>,
    container_manager: Arc<ContainerManager>,
    tool_registry: Arc<ToolDescriptorRegistry>,
    index: Arc<PackageIndexService>,
    resolver: Arc<DependencyResolver>,
    registries: RwLock<Vec<RegistryConfig>>,
    /// Serialises concurrent install/update/remove against the same
    /// package name (spec.md §9, `PackageError::ConcurrentOperation`).
    in_flight: Mutex<HashSet<String>>,
}

impl RegistryService {
    pub fn new(
        packages_repo: Arc<dyn InstalledPackagesRepository>,
        transactions: Arc<dyn TransactionRepository>,
        container_manager: Arc<ContainerManager>,
        tool_registry: Arc<ToolDescriptorRegistry>,
        index: Arc<PackageIndexService>,
        resolver: Arc<DependencyResolver>,
        registries: Vec<RegistryConfig>,
    ) -> Self {
        Self {
            packages_repo,
            transactions,
            container_manager,
            tool_registry,
            index,
            resolver,
            registries: RwLock::new(registries),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn lock_package(&self, name: &str) -> Result<(), RegistryServiceError> {
        let mut guard = self.in_flight.lock();
        if !guard.insert(name.to_string()) {
            return Err(RegistryServiceError::Package(PackageError::ConcurrentOperation(name.to_string())));
        }
        Ok(())
    }

    fn unlock_package(&self, name: &str) {
        self.in_flight.lock().remove(name);
    }

    pub async fn refresh_index(&self, only: Option<&str>) -> Result<(), RegistryServiceError> {
        let registries = self.registries.read().await;
        self.index.refresh(&registries, only).await.map_err(Into::into)
    }

    pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<PackageSearchResult>, RegistryServiceError> {
        let installed = self.packages_repo.load().await?;
        self.index.search(filter, &installed).await.map_err(Into::into)
    }

    pub async fn discover_local_packages(&self, directory: &Path) -> Result<Vec<PackageMetadata>, RegistryServiceError> {
        scan_local_packages(directory).await.map_err(|e| RegistryServiceError::Io(e.to_string()))
    }

    pub async fn install_from_local_path(&self, path: &Path, user_config: InstallUserConfig) -> Result<InstallationRecord, RegistryServiceError> {
        let manifest_path = path.join("mcp.json");
        let contents = tokio::fs::read_to_string(&manifest_path).await?;
        let metadata: PackageMetadata = serde_json::from_str(&contents).map_err(|e| RegistryServiceError::Io(e.to_string()))?;
        let options = InstallOptions { user_config, local_path: Some(path.to_path_buf()), no_rollback: false };
        self.install(&metadata, options).await
    }

    /// Resolve → snapshot → resolve dependencies → install dependencies
    /// then the main package → commit or roll back (spec.md §4.10).
    pub async fn install(&self, metadata: &PackageMetadata, options: InstallOptions) -> Result<InstallationRecord, RegistryServiceError> {
        self.lock_package(&metadata.name)?;
        let result = self.install_locked(metadata, options).await;
        self.unlock_package(&metadata.name);
        result
    }

    async fn install_locked(&self, metadata: &PackageMetadata, options: InstallOptions) -> Result<InstallationRecord, RegistryServiceError> {
        let mut state = self.packages_repo.load().await?;
        if let Some(existing) = state.packages.get(&metadata.name) {
            if existing.version == metadata.version {
                return Err(RegistryServiceError::Package(PackageError::AlreadyInstalled {
                    name: metadata.name.clone(),
                    version: metadata.version.clone(),
                }));
            }
        }

        let mut record = TransactionRecord::create(TransactionOperation::Install, metadata.name.clone(), Some(metadata.version.clone()));

        if !options.no_rollback {
            record.backup_state = Some(self.snapshot(&state).await);
        }
        self.transactions.append(&record).await?;

        let installed_from = if options.local_path.is_some() { "local_path" } else { "registry" };
        let outcome = self.do_install(metadata, &options.user_config, installed_from, &mut state).await;

        match outcome {
            Ok(installed) => {
                self.packages_repo.save(&state).await?;
                self.transactions.append(&record.completed()).await?;
                Ok(installed)
            }
            Err(e) => {
                if let Some(backup) = record.backup_state.clone() {
                    self.restore(&backup).await;
                }
                self.transactions.append(&record.failed(e.to_string())).await?;
                self.transactions.append(&record.rolled_back()).await?;
                Err(e)
            }
        }
    }

    async fn do_install(
        &self,
        metadata: &PackageMetadata,
        user_config: &InstallUserConfig,
        installed_from: &str,
        state: &mut InstalledPackagesFile,
    ) -> Result<InstallationRecord, RegistryServiceError> {
        let dependencies = self.resolver.resolve(metadata, state).await?;
        for dependency in &dependencies {
            self.install_one(dependency, &InstallUserConfig::default(), "dependency", state).await?;
        }
        self.install_one(metadata, user_config, installed_from, state).await
    }

    async fn install_one(
        &self,
        metadata: &PackageMetadata,
        user_config: &InstallUserConfig,
        installed_from: &str,
        state: &mut InstalledPackagesFile,
    ) -> Result<InstallationRecord, RegistryServiceError> {
        let already_version = state.packages.get(&metadata.name).map(|r| r.version.as_str());
        let outcome = self.container_manager.install(metadata, user_config, already_version).await?;

        if let InstallOutcome::Installed { endpoint } = &outcome {
            self.tool_registry.register(ToolServerInfo {
                name: metadata.name.clone(),
                endpoint: endpoint.clone(),
                description: metadata.description.clone(),
                version: Some(metadata.version.clone()),
            });
        }

        let record = InstallationRecord {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            installed_at: chrono::Utc::now(),
            installed_from: installed_from.to_string(),
            transaction_id: String::new(),
            metadata: metadata.clone(),
        };
        state.packages.insert(metadata.name.clone(), record.clone());
        Ok(record)
    }

    /// Snapshot → update via Container Manager (rebuilds image, recreates
    /// container) → new version/timestamp recorded → rollback on failure.
    pub async fn update(&self, name: &str, new_metadata: &PackageMetadata) -> Result<InstallationRecord, RegistryServiceError> {
        self.lock_package(name)?;
        let result = self.update_locked(name, new_metadata).await;
        self.unlock_package(name);
        result
    }

    async fn update_locked(&self, name: &str, new_metadata: &PackageMetadata) -> Result<InstallationRecord, RegistryServiceError> {
        let mut state = self.packages_repo.load().await?;
        if !state.packages.contains_key(name) {
            return Err(RegistryServiceError::Package(PackageError::NotInstalled(name.to_string())));
        }

        let mut record = TransactionRecord::create(TransactionOperation::Update, name.to_string(), Some(new_metadata.version.clone()));
        record.backup_state = Some(self.snapshot(&state).await);
        self.transactions.append(&record).await?;

        match self.install_one(new_metadata, &InstallUserConfig::default(), "update", &mut state).await {
            Ok(updated) => {
                self.packages_repo.save(&state).await?;
                self.transactions.append(&record.completed()).await?;
                Ok(updated)
            }
            Err(e) => {
                if let Some(backup) = record.backup_state.clone() {
                    self.restore(&backup).await;
                }
                self.transactions.append(&record.failed(e.to_string())).await?;
                self.transactions.append(&record.rolled_back()).await?;
                Err(e)
            }
        }
    }

    /// Refuses unless `force`, if any other installed package still lists
    /// `name` as a dependency.
    pub async fn remove(&self, name: &str, force: bool) -> Result<(), RegistryServiceError> {
        self.lock_package(name)?;
        let result = self.remove_locked(name, force).await;
        self.unlock_package(name);
        result
    }

    async fn remove_locked(&self, name: &str, force: bool) -> Result<(), RegistryServiceError> {
        let mut state = self.packages_repo.load().await?;
        let Some(existing) = state.packages.get(name).cloned() else {
            return Err(RegistryServiceError::Package(PackageError::NotInstalled(name.to_string())));
        };

        if !force {
            if let Some(dependent) = find_dependent(&state, name) {
                return Err(RegistryServiceError::HasDependents(name.to_string(), dependent));
            }
        }

        let mut record = TransactionRecord::create(TransactionOperation::Remove, name.to_string(), Some(existing.version.clone()));
        record.backup_state = Some(self.snapshot(&state).await);
        self.transactions.append(&record).await?;

        match self.container_manager.uninstall(&existing.metadata).await {
            Ok(()) => {
                state.packages.remove(name);
                self.packages_repo.save(&state).await?;
                self.transactions.append(&record.completed()).await?;
                Ok(())
            }
            Err(e) => {
                if let Some(backup) = record.backup_state.clone() {
                    self.restore(&backup).await;
                }
                let e = RegistryServiceError::from(e);
                self.transactions.append(&record.failed(e.to_string())).await?;
                self.transactions.append(&record.rolled_back()).await?;
                Err(e)
            }
        }
    }

    /// Manually replay a previously-recorded transaction's backup state
    /// (an operator-invoked rollback, distinct from the automatic rollback
    /// `install`/`update`/`remove` perform on their own failure).
    pub async fn rollback(&self, transaction_id: &str) -> Result<(), RegistryServiceError> {
        let record = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| RegistryServiceError::Io(format!("transaction {transaction_id} not found")))?;
        let Some(backup) = record.backup_state.clone() else {
            return Err(RegistryServiceError::Io(format!("transaction {transaction_id} has no backup state")));
        };
        self.restore(&backup).await;
        self.transactions.append(&record.rolled_back()).await?;
        Ok(())
    }

    /// GPG verification gate for registries with `gpgcheck=true` — called
    /// before committing to an install when the source registry demands it.
    pub async fn verify_signature(
        &self,
        registry: &RegistryConfig,
        manifest_bytes: &[u8],
        signature: &[u8],
    ) -> Result<(), RegistryServiceError> {
        if !registry.gpgcheck {
            return Ok(());
        }
        let Some(gpgkey) = &registry.gpgkey else {
            return Ok(());
        };
        let verifier = GpgVerifier::new()?;
        verifier.import_key(Path::new(gpgkey.trim_start_matches("file://"))).await?;
        verifier.verify(manifest_bytes, signature).await?;
        Ok(())
    }

    async fn snapshot(&self, state: &InstalledPackagesFile) -> BackupState {
        let mut container_states = Vec::with_capacity(state.packages.len());
        for record in state.packages.values() {
            if let Some(runtime) = self.container_manager.runtime_state(&record.name).await {
                if let Some(name) = runtime.container_name {
                    container_states.push(ContainerStateSnapshot { container_name: name, was_running: runtime.running });
                }
            }
        }
        BackupState { declared_state: state.clone(), container_states }
    }

    async fn restore(&self, backup: &BackupState) {
        if let Err(e) = self.packages_repo.save(&backup.declared_state).await {
            tracing::error!(error = %e, "failed to restore declared state during rollback");
        }
        for snapshot in &backup.container_states {
            let Some(record) = backup.declared_state.packages.values().find(|r| {
                self_matches_container(&r.name, &snapshot.container_name)
            }) else {
                continue;
            };
            let outcome = if snapshot.was_running {
                self.container_manager.start(&record.metadata).await
            } else {
                self.container_manager.stop(&record.metadata).await
            };
            if let Err(e) = outcome {
                tracing::warn!(container = %snapshot.container_name, error = %e, "failed to restore container state during rollback");
            }
        }
    }
}

fn find_dependent(state: &InstalledPackagesFile, name: &str) -> Option<String> {
    state.packages.values().find_map(|record| {
        let depends = record
            .metadata
            .dependencies
            .mcps
            .iter()
            .chain(record.metadata.dependencies.agents.iter())
            .any(|d| d.name == name);
        depends.then(|| record.name.clone())
    })
}

fn self_matches_container(package_name: &str, container_name: &str) -> bool {
    container_name.contains(&package_name.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::package::{DependencySpec, InstallationRecord, PackageMetadata, PackageType};

    fn package(name: &str) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            package_type: PackageType::Mcp,
            publisher: None,
            description: None,
            tags: vec![],
            dependencies: Default::default(),
            deployment: Default::default(),
            checksums: Default::default(),
            signature: None,
        }
    }

    fn record(name: &str, deps: Vec<&str>) -> InstallationRecord {
        let mut metadata = package(name);
        metadata.dependencies.mcps =
            deps.into_iter().map(|d| DependencySpec { name: d.to_string(), version: "1.0.0".to_string(), required: true }).collect();
        InstallationRecord {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            installed_at: chrono::Utc::now(),
            installed_from: "registry".to_string(),
            transaction_id: String::new(),
            metadata,
        }
    }

    #[test]
    fn find_dependent_locates_the_sole_dependent_package() {
        let mut state = InstalledPackagesFile::default();
        state.packages.insert("base".to_string(), record("base", vec![]));
        state.packages.insert("consumer".to_string(), record("consumer", vec!["base"]));

        assert_eq!(find_dependent(&state, "base"), Some("consumer".to_string()));
        assert_eq!(find_dependent(&state, "consumer"), None);
    }

    #[test]
    fn self_matches_container_normalises_underscores() {
        assert!(self_matches_container("weather_tool", "aegis-weather-tool-1"));
        assert!(!self_matches_container("weather_tool", "aegis-calendar-tool-1"));
    }
}
