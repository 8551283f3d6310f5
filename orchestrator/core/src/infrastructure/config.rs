// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon configuration: `configs/daemon.yaml` (serde_yaml) and
//! `configs/registries.conf` (INI, via `rust-ini`), per spec.md §6.

use std::path::{Path, PathBuf};

use ini::Ini;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::registry_config::RegistryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("config file is malformed: {0}")]
    Malformed(String),
    #[error("I/O error reading config: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::Io(e.to_string())
        } else {
            ConfigError::Io(e.to_string())
        }
    }
}

/// Top-level daemon settings, `configs/daemon.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_registries_path")]
    pub registries_path: PathBuf,
    #[serde(default = "default_circuit_cooldown_secs")]
    pub registry_circuit_cooldown_secs: u64,
    #[serde(default)]
    pub self_container_name: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7431
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/aegis-tool-orchestrator")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_registries_path() -> PathBuf {
    PathBuf::from("configs/registries.conf")
}

fn default_circuit_cooldown_secs() -> u64 {
    300
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            registries_path: default_registries_path(),
            registry_circuit_cooldown_secs: default_circuit_cooldown_secs(),
            self_container_name: None,
        }
    }
}

impl DaemonConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn executions_dir(&self) -> PathBuf {
        self.data_dir.join("volumes").join("executions")
    }

    pub fn installed_packages_path(&self) -> PathBuf {
        self.data_dir.join("configs").join("installed-packages.json")
    }

    pub fn transactions_log_path(&self) -> PathBuf {
        self.data_dir.join("configs").join("transactions.jsonl")
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir.join("workflows")
    }
}

/// Load every `[section]` of `registries.conf` as a [`RegistryConfig`].
/// Section name becomes `RegistryConfig::name`. Missing keys fall back to
/// conservative defaults (`enabled=true`, `priority=100`, `gpgcheck=false`).
pub async fn load_registries(path: &Path) -> Result<Vec<RegistryConfig>, ConfigError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io(e.to_string())
        }
    })?;

    let ini = Ini::load_from_str(&contents).map_err(|e| ConfigError::Malformed(e.to_string()))?;

    let mut registries = Vec::new();
    for (section_name, props) in ini.iter() {
        let Some(name) = section_name else { continue };
        let url = props
            .get("url")
            .ok_or_else(|| ConfigError::Malformed(format!("registry [{name}] missing url")))?
            .to_string();
        let enabled = props.get("enabled").map(parse_bool).unwrap_or(true);
        let priority = props.get("priority").and_then(|v| v.parse().ok()).unwrap_or(100);
        let gpgcheck = props.get("gpgcheck").map(parse_bool).unwrap_or(false);
        let gpgkey = props.get("gpgkey").map(str::to_string);
        let trust_level = props.get("trust_level").unwrap_or("community").to_string();
        let registry_type = props.get("type").unwrap_or("http").to_string();

        registries.push(RegistryConfig {
            name: name.to_string(),
            url,
            enabled,
            priority,
            gpgcheck,
            gpgkey,
            trust_level,
            registry_type,
        });
    }
    registries.sort_by_key(|r| r.priority);
    Ok(registries)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_falls_back_to_defaults_when_the_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("daemon.yaml")).await.unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7431);
    }

    #[tokio::test]
    async fn load_reads_overrides_and_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.yaml");
        tokio::fs::write(&path, "port: 9000\nlog_level: debug\n").await.unwrap();

        let config = DaemonConfig::load(&path).await.unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn derived_paths_nest_under_data_dir() {
        let config = DaemonConfig { data_dir: PathBuf::from("/data"), ..DaemonConfig::default() };
        assert_eq!(config.executions_dir(), PathBuf::from("/data/volumes/executions"));
        assert_eq!(config.installed_packages_path(), PathBuf::from("/data/configs/installed-packages.json"));
        assert_eq!(config.transactions_log_path(), PathBuf::from("/data/configs/transactions.jsonl"));
        assert_eq!(config.workflows_dir(), PathBuf::from("/data/workflows"));
    }

    #[tokio::test]
    async fn load_registries_applies_defaults_and_sorts_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registries.conf");
        tokio::fs::write(
            &path,
            "[backup]\nurl = https://backup.example\npriority = 10\n\n[primary]\nurl = https://primary.example\npriority = 0\ngpgcheck = true\n",
        )
        .await
        .unwrap();

        let registries = load_registries(&path).await.unwrap();
        assert_eq!(registries.len(), 2);
        assert_eq!(registries[0].name, "primary");
        assert!(registries[0].gpgcheck);
        assert_eq!(registries[1].name, "backup");
        assert!(registries[1].enabled, "enabled should default to true when absent");
    }

    #[tokio::test]
    async fn load_registries_rejects_a_section_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registries.conf");
        tokio::fs::write(&path, "[broken]\npriority = 0\n").await.unwrap();

        let result = load_registries(&path).await;
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn parse_bool_accepts_the_common_truthy_spellings() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("Yes"));
        assert!(parse_bool("ON"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
