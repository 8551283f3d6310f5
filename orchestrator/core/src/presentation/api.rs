// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! REST endpoints + Server-Sent Events for workflow execution and package
//! lifecycle operations (spec.md §6). Business logic is entirely delegated
//! to the Workflow Engine and Registry Service; this module only adapts
//! HTTP in and out.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::application::registry_service::{InstallOptions, RegistryService};
use crate::application::workflow_engine::WorkflowEngine;
use crate::domain::events::WorkflowProgressEvent;
use crate::domain::execution::ExecutionId;
use crate::domain::index::SearchFilter;
use crate::domain::package::{InstallUserConfig, PackageType};
use crate::domain::repository::ExecutionRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::workflow_loader::WorkflowLoader;

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub workflow_loader: Arc<WorkflowLoader>,
    pub execution_repo: Arc<dyn ExecutionRepository>,
    pub registry_service: Arc<RegistryService>,
    pub event_bus: Arc<EventBus>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/workflows", get(list_workflows))
        .route("/workflows/:name/executions", post(start_execution))
        .route("/executions/recent", get(list_recent_executions))
        .route("/executions/:id", get(get_execution))
        .route("/executions/:id/stream", get(stream_execution))
        .route("/executions/:id/cancel", post(cancel_execution))
        .route("/packages/search", get(search_packages))
        .route("/packages/discover", get(discover_packages))
        .route("/packages/refresh", post(refresh_index))
        .route("/packages/install", post(install_package))
        .route("/packages/:name", delete(remove_package))
        .route("/packages/:name/update", post(update_package))
        .route("/transactions/:id/rollback", post(rollback_transaction))
        .with_state(state)
}

async fn list_workflows(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.workflow_loader.list_names().await {
        Ok(names) => Json(json!({ "workflows": names })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct StartExecutionRequest {
    #[serde(default)]
    params: HashMap<String, Value>,
}

async fn start_execution(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<StartExecutionRequest>,
) -> impl IntoResponse {
    let definition = match state.workflow_loader.load(&name).await {
        Ok(def) => def,
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };

    // Build the context and register its cancellation flag before
    // responding, so the id handed back to the caller is the same one
    // `run` keys `ctx.results`/cancellation off of, not an unrelated one.
    let ctx = match state.engine.start_context(&definition, payload.params) {
        Ok(ctx) => ctx,
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };
    let execution_id = ctx.id;

    let engine = state.engine.clone();
    let repo = state.execution_repo.clone();

    tokio::spawn(async move {
        match engine.run(&definition, ctx, None).await {
            Ok(result) => {
                if let Err(e) = repo.save(&result).await {
                    tracing::error!(error = %e, "failed to persist execution result");
                }
            }
            Err(e) => tracing::error!(error = %e, "workflow execution failed before any node ran"),
        }
    });

    Json(json!({ "execution_id": execution_id.to_string(), "status": "accepted" }))
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

async fn list_recent_executions(State(state): State<Arc<AppState>>, Query(query): Query<RecentQuery>) -> impl IntoResponse {
    match state.execution_repo.find_recent(query.limit).await {
        Ok(results) => Json(json!({ "executions": results })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn get_execution(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Json(json!({ "error": "invalid execution id" }));
    };
    match state.execution_repo.find_by_id(ExecutionId(uuid)).await {
        Ok(Some(result)) => Json(json!({ "execution": result })),
        Ok(None) => Json(json!({ "error": "execution not found" })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn cancel_execution(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Json(json!({ "error": "invalid execution id" }));
    };
    state.engine.cancel(ExecutionId(uuid));
    Json(json!({ "status": "cancellation requested" }))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

async fn stream_execution(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Sse<EventStream> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        let stream: EventStream = Box::pin(futures::stream::once(async {
            Ok(Event::default().event("error").data("invalid execution id"))
        }));
        return Sse::new(stream).keep_alive(KeepAlive::default());
    };

    let receiver = state.event_bus.subscribe_execution(ExecutionId(uuid));
    let stream: EventStream = Box::pin(futures::stream::unfold((receiver, false), |(mut receiver, done)| async move {
        if done {
            return None;
        }
        match receiver.recv().await {
            Ok(progress) => {
                let finished = matches!(progress, WorkflowProgressEvent::ExecutionFinished { .. });
                let event = Event::default().json_data(&progress).unwrap_or_else(|_| Event::default().data("serialisation error"));
                Some((Ok(event), (receiver, finished)))
            }
            Err(_) => None,
        }
    }));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    package_type: Option<String>,
    tags: Option<String>,
}

async fn search_packages(State(state): State<Arc<AppState>>, Query(query): Query<SearchQuery>) -> impl IntoResponse {
    let package_type = query.package_type.as_deref().and_then(parse_package_type);
    let tags = query.tags.map(|t| t.split(',').map(str::to_string).collect()).unwrap_or_default();
    let filter = SearchFilter { query: query.q, package_type, tags };

    match state.registry_service.search(&filter).await {
        Ok(results) => Json(json!({ "packages": results })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

fn parse_package_type(s: &str) -> Option<PackageType> {
    match s {
        "mcp" => Some(PackageType::Mcp),
        "agent" => Some(PackageType::Agent),
        "team" => Some(PackageType::Team),
        "trigger" => Some(PackageType::Trigger),
        _ => None,
    }
}

#[derive(Deserialize)]
struct DiscoverQuery {
    path: String,
}

async fn discover_packages(State(state): State<Arc<AppState>>, Query(query): Query<DiscoverQuery>) -> impl IntoResponse {
    match state.registry_service.discover_local_packages(std::path::Path::new(&query.path)).await {
        Ok(packages) => Json(json!({ "packages": packages })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    registry: Option<String>,
}

async fn refresh_index(State(state): State<Arc<AppState>>, Json(payload): Json<RefreshRequest>) -> impl IntoResponse {
    match state.registry_service.refresh_index(payload.registry.as_deref()).await {
        Ok(()) => Json(json!({ "status": "refreshed" })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct InstallRequest {
    name: String,
    version: Option<String>,
    #[serde(default)]
    local_path: Option<String>,
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    no_rollback: bool,
}

async fn install_package(State(state): State<Arc<AppState>>, Json(payload): Json<InstallRequest>) -> impl IntoResponse {
    let user_config = InstallUserConfig { workflow_id: payload.workflow_id, team_id: payload.team_id, extra_env: HashMap::new() };

    if let Some(local_path) = payload.local_path {
        return match state
            .registry_service
            .install_from_local_path(std::path::Path::new(&local_path), user_config)
            .await
        {
            Ok(record) => Json(json!({ "installed": record })),
            Err(e) => Json(json!({ "error": e.to_string() })),
        };
    }

    let metadata = match state
        .registry_service
        .search(&SearchFilter { query: Some(payload.name.clone()), package_type: None, tags: vec![] })
        .await
    {
        Ok(results) => results.into_iter().find(|r| {
            r.metadata.name == payload.name && payload.version.as_deref().is_none_or(|v| r.metadata.version == v)
        }),
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };

    let Some(found) = metadata else {
        return Json(json!({ "error": format!("package not found in index: {}", payload.name) }));
    };

    let options = InstallOptions { user_config, local_path: None, no_rollback: payload.no_rollback };
    match state.registry_service.install(&found.metadata, options).await {
        Ok(record) => Json(json!({ "installed": record })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct UpdateRequest {
    version: String,
}

async fn update_package(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<UpdateRequest>,
) -> impl IntoResponse {
    let new_metadata = match state.registry_service.search(&SearchFilter { query: Some(name.clone()), package_type: None, tags: vec![] }).await
    {
        Ok(results) => results.into_iter().find(|r| r.metadata.name == name && r.metadata.version == payload.version),
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };

    let Some(found) = new_metadata else {
        return Json(json!({ "error": format!("{name}@{} not found in index", payload.version) }));
    };

    match state.registry_service.update(&name, &found.metadata).await {
        Ok(record) => Json(json!({ "updated": record })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    force: bool,
}

async fn remove_package(State(state): State<Arc<AppState>>, Path(name): Path<String>, Query(query): Query<RemoveQuery>) -> impl IntoResponse {
    match state.registry_service.remove(&name, query.force).await {
        Ok(()) => Json(json!({ "status": "removed" })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn rollback_transaction(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry_service.rollback(&id).await {
        Ok(()) => Json(json!({ "status": "rolled_back" })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_package_type_accepts_every_known_spelling_and_rejects_the_rest() {
        assert_eq!(parse_package_type("mcp"), Some(PackageType::Mcp));
        assert_eq!(parse_package_type("agent"), Some(PackageType::Agent));
        assert_eq!(parse_package_type("team"), Some(PackageType::Team));
        assert_eq!(parse_package_type("trigger"), Some(PackageType::Trigger));
        assert_eq!(parse_package_type("bogus"), None);
    }
}
