// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon entry point: wires every infrastructure adapter into the three
//! cores (Session Manager, Workflow Engine, Package & Container Lifecycle
//! Manager) and serves the HTTP surface from
//! `aegis_tool_orchestrator_core::presentation::api`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::signal;
use tracing::info;

use aegis_tool_orchestrator_core::application::dependency_resolver::DependencyResolver;
use aegis_tool_orchestrator_core::application::failover::FailoverManager;
use aegis_tool_orchestrator_core::application::package_index::PackageIndexService;
use aegis_tool_orchestrator_core::application::registry_service::RegistryService;
use aegis_tool_orchestrator_core::application::workflow_engine::WorkflowEngine;
use aegis_tool_orchestrator_core::domain::mcp::TimeoutPolicy;
use aegis_tool_orchestrator_core::infrastructure::config::{load_registries, DaemonConfig};
use aegis_tool_orchestrator_core::infrastructure::container::{ContainerManager, PathMapping};
use aegis_tool_orchestrator_core::infrastructure::event_bus::EventBus;
use aegis_tool_orchestrator_core::infrastructure::registry_http::RegistryHttpClient;
use aegis_tool_orchestrator_core::infrastructure::repositories::{FsExecutionRepository, FsInstalledPackagesRepository};
use aegis_tool_orchestrator_core::infrastructure::session::SessionManager;
use aegis_tool_orchestrator_core::infrastructure::tool_descriptor_registry::ToolDescriptorRegistry;
use aegis_tool_orchestrator_core::infrastructure::transactions::JsonlTransactionLog;
use aegis_tool_orchestrator_core::infrastructure::workflow_loader::WorkflowLoader;
use aegis_tool_orchestrator_core::presentation::api::{self, AppState};

use super::write_pid_file;

/// Start the daemon: load config, build every adapter, bind and serve until
/// SIGINT/SIGTERM. `config_path` overrides the default `configs/daemon.yaml`
/// discovery; `port` overrides whatever the config file declares.
pub async fn start_daemon(config_path: Option<PathBuf>, port: u16) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from("configs/daemon.yaml"));
    let mut config = DaemonConfig::load(&config_path).await.context("failed to load daemon config")?;
    config.port = port;

    write_pid_file(std::process::id())?;

    let docker = bollard::Docker::connect_with_local_defaults().context("failed to connect to Docker")?;
    let network = ContainerManager::detect_network(&docker, config.self_container_name.as_deref()).await;
    let path_mapping = PathMapping::detect(&docker, config.self_container_name.as_deref()).await;
    let container_manager = Arc::new(ContainerManager::new(docker, network, path_mapping));

    let tool_registry = Arc::new(ToolDescriptorRegistry::new());
    let session_manager = Arc::new(SessionManager::new(TimeoutPolicy::default()));
    let workflow_loader = Arc::new(WorkflowLoader::new(config.workflows_dir()));
    let event_bus = Arc::new(EventBus::with_default_capacity());

    let engine = Arc::new(WorkflowEngine::new(
        session_manager.clone(),
        tool_registry.clone(),
        workflow_loader.clone(),
        event_bus.clone(),
    ));

    let execution_repo = Arc::new(FsExecutionRepository::new(config.executions_dir()));
    let packages_repo = Arc::new(FsInstalledPackagesRepository::new(config.installed_packages_path()));
    let transactions = Arc::new(JsonlTransactionLog::new(config.transactions_log_path()));

    let registries = load_registries(&config.registries_path).await.unwrap_or_default();
    let http_client = Arc::new(RegistryHttpClient::new(Duration::from_secs(30)));
    let failover = Arc::new(FailoverManager::new(
        Duration::from_secs(config.registry_circuit_cooldown_secs),
        event_bus.clone(),
    ));
    let package_index_path = config.data_dir.join("configs").join("package-index.json");
    let index = Arc::new(PackageIndexService::new(package_index_path, http_client, failover));
    let resolver = Arc::new(DependencyResolver::new(index.clone()));

    let registry_service = Arc::new(RegistryService::new(
        packages_repo,
        transactions,
        container_manager,
        tool_registry,
        index,
        resolver,
        registries,
    ));

    let state = Arc::new(AppState {
        engine,
        workflow_loader,
        execution_repo,
        registry_service,
        event_bus,
    });

    let started_at = Instant::now();
    let app = Router::new()
        .route("/health", get(health))
        .with_state(started_at)
        .merge(api::app(state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "tool-orchestrator daemon listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    super::remove_pid_file()?;
    Ok(())
}

async fn health(State(started_at): State<Instant>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "uptime_seconds": started_at.elapsed().as_secs() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok_and_a_nonnegative_uptime() {
        let started_at = Instant::now();
        let Json(body) = health(State(started_at)).await;
        assert_eq!(body["status"], "ok");
        assert!(body["uptime_seconds"].as_u64().is_some());
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}
