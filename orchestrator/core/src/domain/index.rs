// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Package Index domain types (spec.md §4.6): the on-disk cache of every
//! registry's package listing, plus the search/filter shape the Registry
//! Service exposes to callers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::package::PackageMetadata;

/// One registry's cached listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndexEntry {
    pub url: String,
    pub packages: Vec<PackageMetadata>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// `{last_updated, registries: {name: {...}}}`, persisted as a single JSON
/// document and loaded lazily (spec.md §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageIndexState {
    pub last_updated: Option<DateTime<Utc>>,
    pub registries: HashMap<String, RegistryIndexEntry>,
}

impl PackageIndexState {
    pub fn all_packages(&self) -> impl Iterator<Item = &PackageMetadata> {
        self.registries.values().flat_map(|r| r.packages.iter())
    }
}

/// Filters accepted by `PackageIndexService::search` (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub package_type: Option<crate::domain::package::PackageType>,
    pub tags: Vec<String>,
}

impl SearchFilter {
    pub fn matches(&self, package: &PackageMetadata) -> bool {
        if let Some(package_type) = self.package_type {
            if package.package_type != package_type {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| package.tags.contains(t)) {
            return false;
        }
        if let Some(query) = &self.query {
            let query = query.to_ascii_lowercase();
            let name_hit = package.name.to_ascii_lowercase().contains(&query);
            let desc_hit = package
                .description
                .as_ref()
                .is_some_and(|d| d.to_ascii_lowercase().contains(&query));
            if !name_hit && !desc_hit {
                return false;
            }
        }
        true
    }
}

/// A package annotated with local installation status for presentation
/// (spec.md §4.6, "Annotate each result with installed/installed_version").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSearchResult {
    #[serde(flatten)]
    pub metadata: PackageMetadata,
    pub installed: bool,
    pub installed_version: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("package index I/O error: {0}")]
    Io(String),
    #[error("package index document is malformed: {0}")]
    Malformed(String),
    #[error("no registry produced a result for this operation")]
    NoRegistrySucceeded,
    #[error("package not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::package::{Checksums, Dependencies, DeploymentSpec, PackageType};

    fn package(name: &str, package_type: PackageType, tags: &[&str], description: &str) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            package_type,
            publisher: None,
            description: Some(description.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            dependencies: Dependencies::default(),
            deployment: DeploymentSpec::default(),
            checksums: Checksums::default(),
            signature: None,
        }
    }

    #[test]
    fn matches_filters_by_package_type() {
        let filter = SearchFilter { query: None, package_type: Some(PackageType::Agent), tags: vec![] };
        assert!(!filter.matches(&package("weather", PackageType::Mcp, &[], "")));
        assert!(filter.matches(&package("planner", PackageType::Agent, &[], "")));
    }

    #[test]
    fn matches_requires_at_least_one_matching_tag() {
        let filter = SearchFilter { query: None, package_type: None, tags: vec!["geo".to_string()] };
        assert!(!filter.matches(&package("weather", PackageType::Mcp, &["finance"], "")));
        assert!(filter.matches(&package("weather", PackageType::Mcp, &["geo", "finance"], "")));
    }

    #[test]
    fn matches_query_against_name_or_description_case_insensitively() {
        let filter = SearchFilter { query: Some("FORECAST".to_string()), package_type: None, tags: vec![] };
        assert!(filter.matches(&package("weather-tool", PackageType::Mcp, &[], "fetches a forecast")));
        assert!(!filter.matches(&package("calendar-tool", PackageType::Mcp, &[], "manages events")));
    }

    #[test]
    fn all_packages_flattens_across_registries() {
        let mut state = PackageIndexState::default();
        state.registries.insert(
            "a".to_string(),
            RegistryIndexEntry { url: "file:///a".to_string(), packages: vec![package("x", PackageType::Mcp, &[], "")], last_updated: None },
        );
        state.registries.insert(
            "b".to_string(),
            RegistryIndexEntry { url: "file:///b".to_string(), packages: vec![package("y", PackageType::Mcp, &[], "")], last_updated: None },
        );
        let names: Vec<&str> = state.all_packages().map(|p| p.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"x"));
        assert!(names.contains(&"y"));
    }
}
