// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dependency Resolver (spec.md §4.5): transitive closure of packages that
//! must be installed for a root manifest, in dependency-first order.
//! Exact `name@version` matching only — no range resolution.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::package::{InstalledPackagesFile, PackageMetadata};

use super::package_index::PackageIndexService;

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("circular dependency detected: {0}")]
    Circular(String),
    #[error("required dependency not found: {0}")]
    NotFound(String),
}

pub struct DependencyResolver {
    index: Arc<PackageIndexService>,
}

impl DependencyResolver {
    pub fn new(index: Arc<PackageIndexService>) -> Self {
        Self { index }
    }

    /// Depth-first traversal over `root`'s declared dependencies. Returns
    /// the dependency-first install order, deduplicated by `name@version`
    /// with first occurrence kept.
    pub async fn resolve(
        &self,
        root: &PackageMetadata,
        installed: &InstalledPackagesFile,
    ) -> Result<Vec<PackageMetadata>, DependencyError> {
        let mut order = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut visiting = HashSet::new();
        self.visit(root, installed, &mut visiting, &mut seen_keys, &mut order).await?;
        Ok(order)
    }

    async fn visit(
        &self,
        package: &PackageMetadata,
        installed: &InstalledPackagesFile,
        visiting: &mut HashSet<String>,
        seen_keys: &mut HashSet<String>,
        order: &mut Vec<PackageMetadata>,
    ) -> Result<(), DependencyError> {
        let key = package.key();
        if !visiting.insert(key.clone()) {
            return Err(DependencyError::Circular(key));
        }

        let specs = package
            .dependencies
            .mcps
            .iter()
            .chain(package.dependencies.agents.iter());

        for spec in specs {
            let dep_key = format!("{}@{}", spec.name, spec.version);
            if installed.packages.contains_key(&spec.name) {
                continue;
            }

            let metadata = match self.index.get_package(&spec.name, Some(&spec.version)).await {
                Ok(Some(metadata)) => metadata,
                _ if !spec.required => continue,
                _ => return Err(DependencyError::NotFound(dep_key)),
            };

            self.visit(&metadata, installed, visiting, seen_keys, order).await?;
            if seen_keys.insert(metadata.key()) {
                order.push(metadata);
            }
        }

        visiting.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::failover::FailoverManager;
    use crate::domain::package::{DependencySpec, Dependencies, PackageType};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::registry_http::RegistryHttpClient;
    use std::time::Duration;

    fn leaf(name: &str, version: &str) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: version.to_string(),
            package_type: PackageType::Mcp,
            publisher: None,
            description: None,
            tags: vec![],
            dependencies: Dependencies::default(),
            deployment: Default::default(),
            checksums: Default::default(),
            signature: None,
        }
    }

    fn resolver_over(path: &std::path::Path) -> DependencyResolver {
        let http = Arc::new(RegistryHttpClient::new(Duration::from_secs(5)));
        let failover = Arc::new(FailoverManager::new(Duration::from_secs(300), Arc::new(EventBus::with_default_capacity())));
        DependencyResolver::new(Arc::new(PackageIndexService::new(path, http, failover)))
    }

    #[tokio::test]
    async fn missing_required_dependency_fails() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_over(&dir.path().join("index.json"));

        let mut root = leaf("app", "1.0.0");
        root.dependencies.mcps.push(DependencySpec { name: "missing-dep".to_string(), version: "1.0.0".to_string(), required: true });

        let result = resolver.resolve(&root, &InstalledPackagesFile::default()).await;
        assert!(matches!(result, Err(DependencyError::NotFound(_))));
    }

    #[tokio::test]
    async fn missing_optional_dependency_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_over(&dir.path().join("index.json"));

        let mut root = leaf("app", "1.0.0");
        root.dependencies.mcps.push(DependencySpec { name: "missing-dep".to_string(), version: "1.0.0".to_string(), required: false });

        let result = resolver.resolve(&root, &InstalledPackagesFile::default()).await;
        assert!(result.unwrap().is_empty());
    }
}
