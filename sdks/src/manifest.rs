// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use aegis_tool_orchestrator_core::domain::package::PackageMetadata;

/// A loadable/saveable `mcp.json` manifest — the document a package author
/// hands to `aegis package publish` or checks into a registry (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PackageManifest(pub PackageMetadata);

impl PackageManifest {
    /// Load a manifest from a JSON file (the on-disk `mcp.json` format).
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Save a manifest to a JSON file.
    pub fn to_json_file(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.0)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let manifest = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Render a manifest to a JSON string.
    pub fn to_json_str(&self) -> anyhow::Result<String> {
        let json = serde_json::to_string_pretty(&self.0)?;
        Ok(json)
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.0
    }
}

impl From<PackageMetadata> for PackageManifest {
    fn from(metadata: PackageMetadata) -> Self {
        Self(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{"name": "weather-tool", "version": "1.0.0", "type": "mcp", "description": "fetches forecasts"}"#
    }

    #[test]
    fn from_json_str_parses_a_minimal_manifest() {
        let manifest = PackageManifest::from_json_str(sample_json()).unwrap();
        assert_eq!(manifest.metadata().name, "weather-tool");
        assert_eq!(manifest.metadata().version, "1.0.0");
    }

    #[test]
    fn to_json_str_round_trips_through_from_json_str() {
        let manifest = PackageManifest::from_json_str(sample_json()).unwrap();
        let rendered = manifest.to_json_str().unwrap();
        let reparsed = PackageManifest::from_json_str(&rendered).unwrap();
        assert_eq!(reparsed.metadata().name, manifest.metadata().name);
        assert_eq!(reparsed.metadata().version, manifest.metadata().version);
    }

    #[test]
    fn from_json_file_then_to_json_file_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let manifest = PackageManifest::from_json_str(sample_json()).unwrap();
        manifest.to_json_file(&path).unwrap();

        let loaded = PackageManifest::from_json_file(&path).unwrap();
        assert_eq!(loaded.metadata().name, "weather-tool");
    }

    #[test]
    fn from_json_str_rejects_malformed_input() {
        assert!(PackageManifest::from_json_str("not json").is_err());
    }
}
