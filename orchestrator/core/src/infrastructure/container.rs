// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container Manager (spec.md §4.9): translates `PackageMetadata.deployment`
//! into concrete containers via the `bollard` Docker API client. The
//! original (`docker_manager.py`) shells out to the `docker` CLI; this is a
//! deliberate REDESIGN (SPEC_FULL §E.5) onto the ecosystem crate the
//! teacher already depends on for Docker access, per spec.md §9's general
//! instruction to prefer specified behaviour over source shortcuts.

use std::collections::HashMap;
use std::path::PathBuf;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::package::{DeploymentSpec, InstallUserConfig, PackageMetadata, RuntimeState};

#[derive(Debug, Error)]
pub enum ContainerRuntimeError {
    #[error("docker API error: {0}")]
    Docker(String),
    #[error("image build failed for {0}: {1}")]
    Build(String, String),
    #[error("port mapping is malformed: {0}")]
    MalformedPort(String),
}

impl From<bollard::errors::Error> for ContainerRuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        ContainerRuntimeError::Docker(e.to_string())
    }
}

/// Translates a container-internal mount path to the host path it actually
/// lives at, built by inspecting the orchestrator's own container mounts at
/// startup — necessary because when this process issues container-create
/// commands over the host's Docker socket, volume paths must be host-rooted
/// even though the orchestrator itself may be running inside a container
/// (spec.md §4.9).
#[derive(Debug, Clone, Default)]
pub struct PathMapping {
    mounts: Vec<(PathBuf, PathBuf)>,
}

impl PathMapping {
    pub fn new(mounts: Vec<(PathBuf, PathBuf)>) -> Self {
        Self { mounts }
    }

    /// Resolve the orchestrator's own mounts via the Docker API by
    /// inspecting the container named `self_container_name` (if running
    /// inside one); returns an empty mapping otherwise.
    pub async fn detect(docker: &Docker, self_container_name: Option<&str>) -> Self {
        let Some(name) = self_container_name else { return Self::default() };
        match docker.inspect_container(name, None).await {
            Ok(info) => {
                let mounts = info
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| match (m.destination, m.source) {
                        (Some(dest), Some(src)) => Some((PathBuf::from(dest), PathBuf::from(src))),
                        _ => None,
                    })
                    .collect();
                Self { mounts }
            }
            Err(e) => {
                warn!(error = %e, "could not inspect own container for volume path mapping");
                Self::default()
            }
        }
    }

    pub fn to_host_path(&self, container_path: &str) -> String {
        for (container_prefix, host_prefix) in &self.mounts {
            if let Ok(suffix) = PathBuf::from(container_path).strip_prefix(container_prefix) {
                return host_prefix.join(suffix).to_string_lossy().to_string();
            }
        }
        container_path.to_string()
    }
}

pub enum InstallOutcome {
    AlreadyInstalled,
    Installed { endpoint: String },
}

pub struct ContainerManager {
    docker: Docker,
    network: String,
    path_mapping: PathMapping,
    /// Runtime fields, reconciled at startup; never persisted.
    runtime: RwLock<HashMap<String, RuntimeState>>,
}

impl ContainerManager {
    pub fn new(docker: Docker, network: String, path_mapping: PathMapping) -> Self {
        Self { docker, network, path_mapping, runtime: RwLock::new(HashMap::new()) }
    }

    /// Auto-detect the network to attach new containers to: an explicit
    /// `MCP_NETWORK` env var override, else inspection of this process's
    /// own container network, else a sensible default.
    pub async fn detect_network(docker: &Docker, self_container_name: Option<&str>) -> String {
        if let Ok(explicit) = std::env::var("MCP_NETWORK") {
            return explicit;
        }
        if let Some(name) = self_container_name {
            if let Ok(info) = docker.inspect_container(name, None).await {
                if let Some(networks) = info.network_settings.and_then(|n| n.networks) {
                    if let Some((name, _)) = networks.into_iter().next() {
                        return name;
                    }
                }
            }
        }
        "bridge".to_string()
    }

    fn container_name(&self, metadata: &PackageMetadata) -> String {
        metadata
            .deployment
            .container_name
            .clone()
            .unwrap_or_else(|| format!("mcp-{}", metadata.name.replace('_', "-")))
    }

    fn image_tag(&self, metadata: &PackageMetadata) -> String {
        format!("{}-{}:{}", resource_type(metadata), metadata.name, metadata.version)
    }

    pub async fn install(
        &self,
        metadata: &PackageMetadata,
        user_config: &InstallUserConfig,
        already_installed_at_version: Option<&str>,
    ) -> Result<InstallOutcome, ContainerRuntimeError> {
        if already_installed_at_version == Some(metadata.version.as_str()) {
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let container_name = self.container_name(metadata);
        let image_tag = self.image_tag(metadata);

        if let Some(build) = &metadata.deployment.build {
            if !self.image_exists(&image_tag).await? {
                self.build_image(&image_tag, build).await?;
            }
        }

        // Best-effort stop+rm of any existing container at this name.
        let _ = self.docker.stop_container(&container_name, None::<StopContainerOptions>).await;
        let _ = self
            .docker
            .remove_container(&container_name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await;

        let image = metadata.deployment.image.clone().unwrap_or(image_tag);
        let host_config = self.build_host_config(&metadata.deployment);
        let env = self.build_environment(metadata, user_config);

        let config = Config {
            image: Some(image),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(CreateContainerOptions { name: container_name.clone(), platform: None }), config)
            .await?;
        self.docker.start_container(&container_name, None::<StartContainerOptions<String>>).await?;

        let endpoint = self.derive_endpoint(&container_name, &metadata.deployment);

        self.runtime.write().await.insert(
            metadata.name.clone(),
            RuntimeState { container_id: Some(created.id), container_name: Some(container_name.clone()), running: true },
        );

        info!(package = %metadata.name, container = %container_name, "container installed and started");
        Ok(InstallOutcome::Installed { endpoint })
    }

    pub async fn uninstall(&self, metadata: &PackageMetadata) -> Result<(), ContainerRuntimeError> {
        let container_name = self.container_name(metadata);
        let _ = self.docker.stop_container(&container_name, None::<StopContainerOptions>).await;
        self.docker
            .remove_container(&container_name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await?;
        self.runtime.write().await.remove(&metadata.name);
        Ok(())
    }

    pub async fn start(&self, metadata: &PackageMetadata) -> Result<(), ContainerRuntimeError> {
        let container_name = self.container_name(metadata);
        self.docker.start_container(&container_name, None::<StartContainerOptions<String>>).await?;
        Ok(())
    }

    pub async fn stop(&self, metadata: &PackageMetadata) -> Result<(), ContainerRuntimeError> {
        let container_name = self.container_name(metadata);
        self.docker.stop_container(&container_name, None::<StopContainerOptions>).await?;
        Ok(())
    }

    pub async fn restart(&self, metadata: &PackageMetadata) -> Result<(), ContainerRuntimeError> {
        self.stop(metadata).await?;
        self.start(metadata).await
    }

    pub async fn is_running(&self, container_name: &str) -> Result<bool, ContainerRuntimeError> {
        match self.docker.inspect_container(container_name, None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// At process start, for every declared installed package, query the
    /// runtime by name. If running, attach the observed id/name to the
    /// in-memory record only; if not, clear and warn. The declarative file
    /// is never touched by this (spec.md §4.9 "Runtime reconciliation").
    pub async fn reconcile(&self, declared_names: &[(String, String)]) {
        let mut runtime = self.runtime.write().await;
        for (package_name, container_name) in declared_names {
            match self.docker.inspect_container(container_name, None).await {
                Ok(info) => {
                    let running = info.state.and_then(|s| s.running).unwrap_or(false);
                    runtime.insert(
                        package_name.clone(),
                        RuntimeState { container_id: info.id, container_name: Some(container_name.clone()), running },
                    );
                }
                Err(_) => {
                    warn!(package = %package_name, container = %container_name, "declared package has no running container");
                    runtime.insert(package_name.clone(), RuntimeState::default());
                }
            }
        }
    }

    pub async fn runtime_state(&self, package_name: &str) -> Option<RuntimeState> {
        self.runtime.read().await.get(package_name).cloned()
    }

    pub async fn container_names_matching(&self, prefix: &str) -> Result<Vec<String>, ContainerRuntimeError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> { all: true, ..Default::default() }))
            .await?;
        Ok(summaries
            .into_iter()
            .flat_map(|c| c.names.unwrap_or_default())
            .map(|n| n.trim_start_matches('/').to_string())
            .filter(|n| n.starts_with(prefix))
            .collect())
    }

    async fn image_exists(&self, tag: &str) -> Result<bool, ContainerRuntimeError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, tag: &str, build: &crate::domain::package::BuildSpec) -> Result<(), ContainerRuntimeError> {
        use futures::StreamExt;

        let options = BuildImageOptions {
            dockerfile: build.dockerfile.clone().unwrap_or_else(|| "Dockerfile".to_string()),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let context_path = PathBuf::from(&build.context);
        let tar_bytes = tar_directory(&context_path).map_err(|e| ContainerRuntimeError::Build(tag.to_string(), e.to_string()))?;

        let mut stream = self.docker.build_image(options, None, Some(tar_bytes.into()));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(ContainerRuntimeError::Build(tag.to_string(), error));
                    }
                }
                Err(e) => return Err(ContainerRuntimeError::Build(tag.to_string(), e.to_string())),
            }
        }
        Ok(())
    }

    fn build_host_config(&self, deployment: &DeploymentSpec) -> HostConfig {
        let mut port_bindings = HashMap::new();
        for port_spec in &deployment.ports {
            if let Some((container_port, host_port)) = parse_port_mapping(port_spec) {
                port_bindings.insert(
                    container_port,
                    Some(vec![PortBinding { host_ip: None, host_port: Some(host_port) }]),
                );
            }
        }

        let binds: Vec<String> = deployment
            .volumes
            .iter()
            .map(|v| self.resolve_volume_mount(v))
            .collect();

        HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            network_mode: Some(deployment.network_mode.clone().unwrap_or_else(|| self.network.clone())),
            restart_policy: deployment.restart.as_ref().map(|policy| bollard::models::RestartPolicy {
                name: restart_policy_name(policy),
                maximum_retry_count: None,
            }),
            cap_add: if deployment.cap_add.is_empty() { None } else { Some(deployment.cap_add.clone()) },
            ..Default::default()
        }
    }

    fn resolve_volume_mount(&self, spec: &str) -> String {
        let mut parts = spec.splitn(2, ':');
        let container_path = parts.next().unwrap_or(spec);
        let rest = parts.next();
        let host_path = self.path_mapping.to_host_path(container_path);
        match rest {
            Some(rest) => format!("{host_path}:{rest}"),
            None => host_path,
        }
    }

    fn build_environment(&self, metadata: &PackageMetadata, user_config: &InstallUserConfig) -> Vec<String> {
        let mut env: Vec<String> = metadata
            .deployment
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={}", resolve_placeholder(v)))
            .collect();

        if let Ok(url) = std::env::var("ORCHESTRATOR_URL") {
            env.push(format!("ORCHESTRATOR_URL={url}"));
        }
        if let Ok(ws) = std::env::var("ORCHESTRATOR_WS") {
            env.push(format!("ORCHESTRATOR_WS={ws}"));
        }
        if let Some(ref workflow_id) = user_config.workflow_id {
            env.push(format!("WORKFLOW_ID={workflow_id}"));
        }
        if let Some(ref team_id) = user_config.team_id {
            env.push(format!("TEAM_ID={team_id}"));
        }
        for (k, v) in &user_config.extra_env {
            env.push(format!("{k}={v}"));
        }
        env
    }

    /// `network_mode=host` → `http://host.docker.internal:{port}`.
    /// Otherwise → `http://{container_name}:{container_port}` (spec.md §4.9).
    fn derive_endpoint(&self, container_name: &str, deployment: &DeploymentSpec) -> String {
        let port = deployment
            .ports
            .first()
            .and_then(|p| parse_port_mapping(p))
            .map(|(container_port, _)| container_port)
            .unwrap_or_else(|| "8080".to_string());

        if deployment.network_mode.as_deref() == Some("host") {
            format!("http://host.docker.internal:{port}")
        } else {
            format!("http://{container_name}:{port}")
        }
    }
}

fn resource_type(metadata: &PackageMetadata) -> &'static str {
    match metadata.package_type {
        crate::domain::package::PackageType::Mcp => "mcp",
        crate::domain::package::PackageType::Agent => "agent",
        crate::domain::package::PackageType::Team => "team",
        crate::domain::package::PackageType::Trigger => "trigger",
    }
}

fn restart_policy_name(policy: &str) -> bollard::models::RestartPolicyNameEnum {
    match policy {
        "always" => bollard::models::RestartPolicyNameEnum::ALWAYS,
        "on-failure" => bollard::models::RestartPolicyNameEnum::ON_FAILURE,
        "unless-stopped" => bollard::models::RestartPolicyNameEnum::UNLESS_STOPPED,
        _ => bollard::models::RestartPolicyNameEnum::NO,
    }
}

/// Resolve `${VAR:-default}`-style placeholders against the process
/// environment (spec.md §4.9 port-mapping/env resolution).
fn resolve_placeholder(value: &str) -> String {
    if let Some(inner) = value.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        if let Some((var, default)) = inner.split_once(":-") {
            return std::env::var(var).unwrap_or_else(|_| default.to_string());
        }
        return std::env::var(inner).unwrap_or_default();
    }
    value.to_string()
}

fn parse_port_mapping(spec: &str) -> Option<(String, String)> {
    let resolved = resolve_placeholder(spec);
    let mut parts = resolved.splitn(2, ':');
    let host = parts.next()?;
    let container = parts.next().unwrap_or(host);
    Some((container.to_string(), host.to_string()))
}

/// Build a minimal uncompressed tar stream of `dir` for `bollard`'s
/// `build_image`, which expects a tar archive as the build context.
fn tar_directory(dir: &PathBuf) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::package::PackageType;

    fn manager() -> ContainerManager {
        let docker = Docker::connect_with_local_defaults().expect("docker client construction does not require a live daemon");
        ContainerManager::new(docker, "bridge".to_string(), PathMapping::default())
    }

    fn metadata(name: &str, package_type: PackageType) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            package_type,
            publisher: None,
            description: None,
            tags: vec![],
            dependencies: Default::default(),
            deployment: DeploymentSpec::default(),
            checksums: Default::default(),
            signature: None,
        }
    }

    #[test]
    fn resource_type_maps_every_package_type() {
        assert_eq!(resource_type(&metadata("a", PackageType::Mcp)), "mcp");
        assert_eq!(resource_type(&metadata("a", PackageType::Agent)), "agent");
        assert_eq!(resource_type(&metadata("a", PackageType::Team)), "team");
        assert_eq!(resource_type(&metadata("a", PackageType::Trigger)), "trigger");
    }

    #[test]
    fn restart_policy_name_falls_back_to_no_for_unknown_strings() {
        assert_eq!(restart_policy_name("always"), bollard::models::RestartPolicyNameEnum::ALWAYS);
        assert_eq!(restart_policy_name("unless-stopped"), bollard::models::RestartPolicyNameEnum::UNLESS_STOPPED);
        assert_eq!(restart_policy_name("bogus"), bollard::models::RestartPolicyNameEnum::NO);
    }

    #[test]
    fn resolve_placeholder_applies_the_default_when_the_env_var_is_unset() {
        std::env::remove_var("AEGIS_TEST_CONTAINER_VAR");
        assert_eq!(resolve_placeholder("${AEGIS_TEST_CONTAINER_VAR:-fallback}"), "fallback");
        assert_eq!(resolve_placeholder("literal"), "literal");
    }

    #[test]
    fn resolve_placeholder_prefers_an_actually_set_env_var() {
        std::env::set_var("AEGIS_TEST_CONTAINER_VAR2", "present");
        assert_eq!(resolve_placeholder("${AEGIS_TEST_CONTAINER_VAR2:-fallback}"), "present");
        std::env::remove_var("AEGIS_TEST_CONTAINER_VAR2");
    }

    #[test]
    fn parse_port_mapping_splits_host_and_container_ports() {
        assert_eq!(parse_port_mapping("8080:80"), Some(("80".to_string(), "8080".to_string())));
        assert_eq!(parse_port_mapping("9000"), Some(("9000".to_string(), "9000".to_string())));
    }

    #[test]
    fn path_mapping_translates_a_prefixed_container_path_and_passes_through_others() {
        let mapping = PathMapping::new(vec![(PathBuf::from("/data"), PathBuf::from("/host/data"))]);
        assert_eq!(mapping.to_host_path("/data/packages/weather-tool"), "/host/data/packages/weather-tool");
        assert_eq!(mapping.to_host_path("/unrelated/path"), "/unrelated/path");
    }

    #[test]
    fn container_name_falls_back_to_a_derived_name_when_unset() {
        let manager = manager();
        let mut meta = metadata("weather_tool", PackageType::Mcp);
        assert_eq!(manager.container_name(&meta), "mcp-weather-tool");

        meta.deployment.container_name = Some("custom-name".to_string());
        assert_eq!(manager.container_name(&meta), "custom-name");
    }

    #[test]
    fn image_tag_combines_resource_type_name_and_version() {
        let manager = manager();
        let meta = metadata("weather-tool", PackageType::Mcp);
        assert_eq!(manager.image_tag(&meta), "mcp-weather-tool:1.0.0");
    }

    #[test]
    fn resolve_volume_mount_rewrites_only_the_container_side() {
        let docker = Docker::connect_with_local_defaults().unwrap();
        let mapping = PathMapping::new(vec![(PathBuf::from("/data"), PathBuf::from("/host/data"))]);
        let manager = ContainerManager::new(docker, "bridge".to_string(), mapping);
        assert_eq!(manager.resolve_volume_mount("/data/db:/var/lib/db:ro"), "/host/data/db:/var/lib/db:ro");
        assert_eq!(manager.resolve_volume_mount("/data/db"), "/host/data/db");
    }

    #[test]
    fn derive_endpoint_uses_host_docker_internal_only_in_host_network_mode() {
        let manager = manager();
        let mut deployment = DeploymentSpec { ports: vec!["8080:80".to_string()], ..Default::default() };
        assert_eq!(manager.derive_endpoint("mcp-weather-tool", &deployment), "http://mcp-weather-tool:80");

        deployment.network_mode = Some("host".to_string());
        assert_eq!(manager.derive_endpoint("mcp-weather-tool", &deployment), "http://host.docker.internal:80");
    }

    #[test]
    fn build_environment_includes_user_config_and_resolved_placeholders() {
        std::env::remove_var("AEGIS_TEST_PLACEHOLDER");
        let manager = manager();
        let mut meta = metadata("weather-tool", PackageType::Mcp);
        meta.deployment.environment.insert("API_KEY".to_string(), "${AEGIS_TEST_PLACEHOLDER:-demo}".to_string());
        let user_config = InstallUserConfig { workflow_id: Some("wf-1".to_string()), team_id: None, extra_env: Default::default() };

        let env = manager.build_environment(&meta, &user_config);
        assert!(env.contains(&"API_KEY=demo".to_string()));
        assert!(env.contains(&"WORKFLOW_ID=wf-1".to_string()));
    }
}
