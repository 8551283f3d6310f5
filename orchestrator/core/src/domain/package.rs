// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Package & deployment domain model: the shape of `mcp.json` manifests,
//! installed-package declarative state, and the transient in-memory
//! installation status used to serialise concurrent installs of the same
//! package.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of package a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Mcp,
    Agent,
    Team,
    Trigger,
}

/// One declared dependency. `required` defaults to `true`; the Resolver
/// only hard-fails on a missing *required* dependency (SPEC_FULL §C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    /// Exact version string — the Resolver performs no range matching.
    pub version: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub mcps: Vec<DependencySpec>,
    #[serde(default)]
    pub agents: Vec<DependencySpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build: Option<BuildSpec>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub restart: Option<String>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checksums {
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
}

/// `mcp.json` manifest contents, spec.md §3/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(rename = "type", default = "default_package_type")]
    pub package_type: PackageType,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub checksums: Checksums,
    #[serde(default)]
    pub signature: Option<String>,
}

fn default_package_type() -> PackageType {
    PackageType::Mcp
}

impl PackageMetadata {
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Transient in-memory status tracked while an install/update/remove is in
/// flight, so concurrent operations against the same package can be
/// rejected with a clear error rather than corrupting the declared-state
/// file (SPEC_FULL §C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    Installed,
    Updating,
    Removing,
}

/// One installed-package entry, persisted to `installed-packages.json`.
/// `container_id`/`container_name` are **not** part of this type — they
/// live only in the in-memory reconciliation map the Container Manager
/// keeps, per spec.md §3's portability invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub name: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub installed_from: String,
    pub transaction_id: String,
    pub metadata: PackageMetadata,
}

/// The on-disk declarative state document, `configs/installed-packages.json`.
///
/// `packages` is a `BTreeMap`, not a `HashMap`: this document is
/// snapshotted into the transaction log and restored verbatim on rollback
/// (`RegistryService::snapshot`/`restore`), and a `HashMap`'s iteration
/// order depends on its per-instance random hasher seed, not on what was
/// loaded from disk. A `BTreeMap` orders by key regardless of which
/// instance produced it, so re-serializing a restored snapshot reproduces
/// the same bytes the original save did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPackagesFile {
    pub version: String,
    pub packages: BTreeMap<String, InstallationRecord>,
}

impl Default for InstalledPackagesFile {
    fn default() -> Self {
        Self { version: "2.0".to_string(), packages: BTreeMap::new() }
    }
}

/// Runtime-only fields reconciled from the container runtime at startup;
/// never persisted (spec.md §4.9 "Runtime reconciliation").
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub running: bool,
}

/// User-supplied configuration for an install, required for `trigger`
/// packages (spec.md §4.9).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallUserConfig {
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub extra_env: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("package manifest is malformed: {0}")]
    Malformed(String),
    #[error("package {name}@{version} is already installed")]
    AlreadyInstalled { name: String, version: String },
    #[error("package {0} is not installed")]
    NotInstalled(String),
    #[error("concurrent operation already in progress for package {0}")]
    ConcurrentOperation(String),
    #[error("cannot remove {package}: {dependent} depends on it")]
    HasDependents { package: String, dependent: String },
    #[error("required user config missing for trigger package {0}: workflow_id or team_id")]
    MissingTriggerConfig(String),
}

pub fn value_as_object(v: Value) -> HashMap<String, Value> {
    match v {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_combines_name_and_version() {
        let metadata = PackageMetadata {
            name: "weather-tool".to_string(),
            version: "1.2.3".to_string(),
            package_type: PackageType::Mcp,
            publisher: None,
            description: None,
            tags: vec![],
            dependencies: Dependencies::default(),
            deployment: DeploymentSpec::default(),
            checksums: Checksums::default(),
            signature: None,
        };
        assert_eq!(metadata.key(), "weather-tool@1.2.3");
    }

    #[test]
    fn value_as_object_extracts_map_and_discards_non_objects() {
        let object = value_as_object(json!({"a": 1, "b": "two"}));
        assert_eq!(object.get("a"), Some(&json!(1)));
        assert_eq!(object.get("b"), Some(&json!("two")));

        assert!(value_as_object(json!([1, 2, 3])).is_empty());
        assert!(value_as_object(json!(null)).is_empty());
    }

    #[test]
    fn dependency_spec_required_defaults_to_true_when_absent() {
        let spec: DependencySpec = serde_json::from_value(json!({"name": "dep", "version": "1.0.0"})).unwrap();
        assert!(spec.required);
    }

    #[test]
    fn installed_packages_file_default_starts_empty_at_version_2() {
        let file = InstalledPackagesFile::default();
        assert_eq!(file.version, "2.0");
        assert!(file.packages.is_empty());
    }
}
