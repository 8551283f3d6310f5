// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Engine (spec.md §4.3): interprets a [`WorkflowDefinition`] as a
//! typed-node DAG. Nodes run in topological order; `if` steers which
//! branch of the order actually executes, `try_catch` and its
//! try/catch/finally nodes are invoked directly by their owning handler
//! rather than by the main loop, `for_each` fans out bounded-parallel
//! sub-workflow runs, and `sub_workflow` recurses into this same engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::domain::events::{DomainEvent, WorkflowProgressEvent};
use crate::domain::execution::{ExecutionContext, ExecutionId, ExecutionResult, ExecutionStatus, LogLevel, NodeError, NodeState};
use crate::domain::expression::{self, ExpressionError};
use crate::domain::mcp::SessionError;
use crate::domain::workflow::{Node, NodeId, WorkflowDefinition, WorkflowError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::session::SessionManager;
use crate::infrastructure::tool_descriptor_registry::ToolDescriptorRegistry;
use crate::infrastructure::workflow_loader::{WorkflowLoadError, WorkflowLoader};

use super::template::{self, TemplateError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("failed to load sub-workflow: {0}")]
    SubWorkflowLoad(#[from] WorkflowLoadError),
}

/// A single node's failure, carried within [`ExecutionContext::errors`]
/// rather than aborting the whole `execute` call — the Engine always
/// returns an `ExecutionResult`, never a bare error, once past validation.
#[derive(Debug, Clone)]
struct NodeFailure {
    message: String,
    error_type: String,
}

impl From<ExpressionError> for NodeFailure {
    fn from(e: ExpressionError) -> Self {
        Self { message: e.to_string(), error_type: "expression_error".to_string() }
    }
}

impl From<TemplateError> for NodeFailure {
    fn from(e: TemplateError) -> Self {
        Self { message: e.to_string(), error_type: "template_error".to_string() }
    }
}

impl From<SessionError> for NodeFailure {
    fn from(e: SessionError) -> Self {
        Self { message: e.to_string(), error_type: "session_error".to_string() }
    }
}

impl From<WorkflowLoadError> for NodeFailure {
    fn from(e: WorkflowLoadError) -> Self {
        Self { message: e.to_string(), error_type: "sub_workflow_error".to_string() }
    }
}

/// Caller-supplied progress sink. Invoked from the execution task; must not
/// block. A panic inside is caught and logged, never propagated — matching
/// spec.md §4.3's "if the callback raises, the Engine logs and continues".
pub type ProgressCallback = Arc<dyn Fn(WorkflowProgressEvent) + Send + Sync>;

pub struct WorkflowEngine {
    session_manager: Arc<SessionManager>,
    tool_registry: Arc<ToolDescriptorRegistry>,
    workflow_loader: Arc<WorkflowLoader>,
    event_bus: Arc<EventBus>,
    cancellations: DashMap<ExecutionId, Arc<AtomicBool>>,
}

impl WorkflowEngine {
    pub fn new(
        session_manager: Arc<SessionManager>,
        tool_registry: Arc<ToolDescriptorRegistry>,
        workflow_loader: Arc<WorkflowLoader>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self { session_manager, tool_registry, workflow_loader, event_bus, cancellations: DashMap::new() }
    }

    /// Request cancellation of an in-flight execution. Cooperative: the
    /// currently-running node finishes its tool call; subsequent nodes are
    /// skipped and the final status is `cancelled` (spec.md §5).
    pub fn cancel(&self, execution_id: ExecutionId) {
        if let Some(flag) = self.cancellations.get(&execution_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Validate `definition` and build a fresh [`ExecutionContext`],
    /// registering its cancellation flag immediately. Callers that need to
    /// hand an [`ExecutionId`] to a client before the run itself finishes
    /// (the HTTP surface's `POST /workflows/:name/executions`, spec.md §6)
    /// should call this synchronously, return `ctx.id`, then pass the
    /// returned context into [`Self::run`] from a spawned task — this is
    /// the same id `cancel`/`run` key off, so `POST .../cancel` and
    /// `GET .../stream` immediately after work (spec.md §4.3).
    pub fn start_context(&self, definition: &WorkflowDefinition, params: HashMap<String, Value>) -> Result<ExecutionContext, EngineError> {
        definition.validate()?;
        let ctx = ExecutionContext::new(definition.name.clone(), params);
        self.cancellations.entry(ctx.id).or_insert_with(|| Arc::new(AtomicBool::new(false)));
        Ok(ctx)
    }

    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        params: HashMap<String, Value>,
        progress: Option<ProgressCallback>,
    ) -> Result<ExecutionResult, EngineError> {
        let ctx = self.start_context(definition, params)?;
        self.run(definition, ctx, progress).await
    }

    /// Run a context through to completion. `ctx.id` drives
    /// cancellation/correlation, so if `ctx` didn't already come from
    /// [`Self::start_context`] (e.g. a sub-workflow's own context), this
    /// registers a fresh cancellation flag for it.
    pub(crate) async fn run(
        &self,
        definition: &WorkflowDefinition,
        mut ctx: ExecutionContext,
        progress: Option<ProgressCallback>,
    ) -> Result<ExecutionResult, EngineError> {
        let order = definition.topological_order()?;
        let table = definition.node_table();

        let mut skip: HashSet<NodeId> = owned_by_control_flow(definition);

        let cancel_flag = self.cancellations.entry(ctx.id).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone();

        let mut status = ExecutionStatus::Completed;

        for node_id in &order {
            if cancel_flag.load(Ordering::SeqCst) {
                status = ExecutionStatus::Cancelled;
                break;
            }
            if skip.contains(node_id) {
                // A try/catch/finally node reached here after already running
                // via `run_owned_node` (it stays in `skip` permanently, unlike
                // an `if` branch) must keep the state that run recorded.
                ctx.node_states.entry(node_id.clone()).or_insert(NodeState::Skipped);
                continue;
            }

            let node = table[node_id];
            ctx.node_states.insert(node_id.clone(), NodeState::Running);
            self.emit(&progress, WorkflowProgressEvent::NodeStateChanged {
                execution_id: ctx.id,
                node_id: node_id.clone(),
                status: NodeState::Running,
                node_states_snapshot: ctx.node_states.clone(),
                at: Utc::now(),
            });

            match self.run_node_boxed(definition, node, &mut ctx, &mut skip).await {
                Ok(value) => {
                    ctx.results.insert(node_id.clone(), value);
                    ctx.node_states.insert(node_id.clone(), NodeState::Completed);
                    self.emit(&progress, WorkflowProgressEvent::NodeStateChanged {
                        execution_id: ctx.id,
                        node_id: node_id.clone(),
                        status: NodeState::Completed,
                        node_states_snapshot: ctx.node_states.clone(),
                        at: Utc::now(),
                    });
                }
                Err(failure) => {
                    ctx.errors.push(NodeError {
                        node_id: node_id.clone(),
                        message: failure.message.clone(),
                        error_type: failure.error_type.clone(),
                    });
                    ctx.node_states.insert(node_id.clone(), NodeState::Error);
                    ctx.log(Some(node_id.clone()), LogLevel::Error, failure.message.clone());
                    self.emit(&progress, WorkflowProgressEvent::NodeStateChanged {
                        execution_id: ctx.id,
                        node_id: node_id.clone(),
                        status: NodeState::Error,
                        node_states_snapshot: ctx.node_states.clone(),
                        at: Utc::now(),
                    });
                    status = ExecutionStatus::Failed;
                    break;
                }
            }
        }

        self.cancellations.remove(&ctx.id);
        let result = ctx.into_result(status);
        self.event_bus.publish_workflow_event(WorkflowProgressEvent::ExecutionFinished {
            execution_id: result.id,
            status,
            at: Utc::now(),
        });
        Ok(result)
    }

    fn emit(&self, progress: &Option<ProgressCallback>, event: WorkflowProgressEvent) {
        self.event_bus.publish_workflow_event(event.clone());
        if let Some(cb) = progress {
            let cb = cb.clone();
            let event = event.clone();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(event))) {
                warn!(?panic, "workflow progress callback panicked; continuing");
            }
        }
    }

    /// Boxed indirection so `if`/`try_catch`/`for_each`/`sub_workflow`
    /// handlers can recurse into node execution without an infinitely
    /// sized async fn.
    fn run_node_boxed<'a>(
        &'a self,
        definition: &'a WorkflowDefinition,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
        skip: &'a mut HashSet<NodeId>,
    ) -> BoxFuture<'a, Result<Value, NodeFailure>> {
        Box::pin(self.run_node(definition, node, ctx, skip))
    }

    async fn run_node(
        &self,
        definition: &WorkflowDefinition,
        node: &Node,
        ctx: &mut ExecutionContext,
        skip: &mut HashSet<NodeId>,
    ) -> Result<Value, NodeFailure> {
        match node {
            Node::McpCall { mcp_server, tool, params, .. } => self.handle_mcp_call(mcp_server, tool, params, ctx).await,
            Node::If { condition, true_branch, false_branch, .. } => {
                self.handle_if(condition, true_branch, false_branch, definition, ctx, skip)
            }
            Node::ForEach { items, item_var, index_var, sub_workflow, max_parallel, collect_results, stop_on_error, .. } => {
                self.handle_for_each(items, item_var, index_var.as_deref(), sub_workflow, *max_parallel, *collect_results, *stop_on_error, ctx).await
            }
            Node::TryCatch { try_node, catch_node, finally_node, error_var, .. } => {
                self.handle_try_catch(try_node, catch_node.as_ref(), finally_node.as_ref(), error_var, definition, ctx, skip).await
            }
            Node::SubWorkflow { workflow, params, .. } => self.handle_sub_workflow(workflow, params, ctx).await,
            Node::Set { variables, .. } => self.handle_set(variables, ctx),
            Node::Sleep { duration, reason, .. } => self.handle_sleep(*duration, reason.as_deref(), ctx).await,
        }
    }

    async fn handle_mcp_call(
        &self,
        mcp_server: &str,
        tool: &str,
        params: &HashMap<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, NodeFailure> {
        let resolved = template::resolve_params(params, ctx)?;
        let server = self.tool_registry.get(mcp_server).ok_or_else(|| NodeFailure {
            message: format!("unknown tool server: {mcp_server}"),
            error_type: "unknown_tool_server".to_string(),
        })?;

        let result = self
            .session_manager
            .call_tool(&server.endpoint, tool, Value::Object(resolved.into_iter().collect()))
            .await?;
        if result.is_error {
            return Err(NodeFailure { message: result.content.to_string(), error_type: "tool_error".to_string() });
        }
        Ok(result.content)
    }

    fn handle_if(
        &self,
        condition: &str,
        true_branch: &NodeId,
        false_branch: &NodeId,
        definition: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        skip: &mut HashSet<NodeId>,
    ) -> Result<Value, NodeFailure> {
        let merged = expr_context(ctx);
        let taken = expression::evaluate_bool(condition, &merged)?;
        let (chosen, other) = if taken { (true_branch, false_branch) } else { (false_branch, true_branch) };

        // Activate the chosen branch for normal topological execution;
        // the unchosen branch's exclusive descendants stay skipped.
        skip.remove(chosen);
        let chosen_descendants = descendants(definition, chosen);
        let other_descendants = descendants(definition, other);
        for node_id in other_descendants.difference(&chosen_descendants) {
            skip.insert(node_id.clone());
        }

        Ok(Value::String(chosen.0.clone()))
    }

    async fn handle_for_each(
        &self,
        items_expr: &str,
        item_var: &str,
        index_var: Option<&str>,
        sub_workflow: &str,
        max_parallel: usize,
        collect_results: bool,
        stop_on_error: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, NodeFailure> {
        let merged = expr_context(ctx);
        let items = match expression::evaluate(items_expr, &merged)? {
            expression::Value::List(items) => items,
            other => {
                return Err(NodeFailure {
                    message: format!("for_each `items` did not evaluate to a list (got {other})"),
                    error_type: "type_error".to_string(),
                })
            }
        };

        let base_params: HashMap<String, Value> = ctx.merged_values();
        let definition = self.workflow_loader.load(sub_workflow).await.map_err(NodeFailure::from)?;
        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));

        let mut tasks = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let mut params = base_params.clone();
            params.insert(item_var.to_string(), item.into_json());
            if let Some(index_var) = index_var {
                params.insert(index_var.to_string(), Value::from(index));
            }
            let definition = definition.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                (index, self.execute(&definition, params, None).await)
            });
        }

        let mut results: Vec<(usize, Result<ExecutionResult, EngineError>)> = futures::future::join_all(tasks).await;
        results.sort_by_key(|(index, _)| *index);

        let mut out = Vec::with_capacity(results.len());
        for (_, outcome) in results {
            match outcome {
                Ok(result) if result.errors.is_empty() => {
                    out.push(Value::Object(result.results.into_iter().collect()));
                }
                Ok(result) => {
                    let message = result.errors.first().map(|e| e.message.clone()).unwrap_or_default();
                    if stop_on_error {
                        return Err(NodeFailure { message, error_type: "for_each_item_error".to_string() });
                    }
                    out.push(serde_json::json!({ "error": message }));
                }
                Err(e) => {
                    if stop_on_error {
                        return Err(NodeFailure { message: e.to_string(), error_type: "for_each_item_error".to_string() });
                    }
                    out.push(serde_json::json!({ "error": e.to_string() }));
                }
            }
        }

        if collect_results {
            Ok(Value::Array(out))
        } else {
            Ok(Value::Null)
        }
    }

    async fn handle_try_catch(
        &self,
        try_node: &NodeId,
        catch_node: Option<&NodeId>,
        finally_node: Option<&NodeId>,
        error_var: &str,
        definition: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        skip: &mut HashSet<NodeId>,
    ) -> Result<Value, NodeFailure> {
        let table = definition.node_table();
        let try_result = self.run_owned_node(definition, &table, try_node, ctx, skip).await;

        let outcome = match try_result {
            Ok(value) => Ok(value),
            Err(failure) => {
                ctx.variables.insert(
                    error_var.to_string(),
                    serde_json::json!({ "message": failure.message, "type": failure.error_type, "node_id": try_node.0 }),
                );
                if let Some(catch_node) = catch_node {
                    self.run_owned_node(definition, &table, catch_node, ctx, skip).await
                } else {
                    Ok(Value::Null)
                }
            }
        };

        if let Some(finally_node) = finally_node {
            // Exceptions inside finally propagate, overriding the try/catch outcome.
            self.run_owned_node(definition, &table, finally_node, ctx, skip).await?;
        }

        outcome
    }

    /// Execute a node referenced by `try_node`/`catch_node`/`finally_node`
    /// directly, storing its result/state in `ctx` exactly like the main
    /// loop would, without re-entering the topological order.
    async fn run_owned_node(
        &self,
        definition: &WorkflowDefinition,
        table: &HashMap<NodeId, &Node>,
        node_id: &NodeId,
        ctx: &mut ExecutionContext,
        skip: &mut HashSet<NodeId>,
    ) -> Result<Value, NodeFailure> {
        let node = table[node_id];
        ctx.node_states.insert(node_id.clone(), NodeState::Running);
        let result = self.run_node_boxed(definition, node, ctx, skip).await;
        match &result {
            Ok(value) => {
                ctx.results.insert(node_id.clone(), value.clone());
                ctx.node_states.insert(node_id.clone(), NodeState::Completed);
            }
            Err(failure) => {
                ctx.node_states.insert(node_id.clone(), NodeState::Error);
                ctx.errors.push(NodeError {
                    node_id: node_id.clone(),
                    message: failure.message.clone(),
                    error_type: failure.error_type.clone(),
                });
            }
        }
        result
    }

    async fn handle_sub_workflow(
        &self,
        workflow: &str,
        params: &HashMap<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, NodeFailure> {
        let resolved = template::resolve_params(params, ctx)?;
        let definition = self.workflow_loader.load(workflow).await.map_err(NodeFailure::from)?;
        let sub_ctx = ExecutionContext::for_sub_workflow(workflow.to_string(), resolved);
        let result = self.run(&definition, sub_ctx, None).await.map_err(|e| NodeFailure {
            message: e.to_string(),
            error_type: "sub_workflow_error".to_string(),
        })?;

        if !result.errors.is_empty() {
            let message = result.errors.first().map(|e| e.message.clone()).unwrap_or_default();
            return Err(NodeFailure { message, error_type: "sub_workflow_error".to_string() });
        }
        Ok(Value::Object(result.results.into_iter().collect()))
    }

    fn handle_set(&self, variables: &HashMap<String, String>, ctx: &mut ExecutionContext) -> Result<Value, NodeFailure> {
        let merged = expr_context(ctx);
        let mut evaluated = serde_json::Map::with_capacity(variables.len());
        for (key, expr) in variables {
            let value = expression::evaluate(expr, &merged)?;
            let json = value.into_json();
            ctx.variables.insert(key.clone(), json.clone());
            evaluated.insert(key.clone(), json);
        }
        Ok(Value::Object(evaluated))
    }

    async fn handle_sleep(&self, duration: f64, reason: Option<&str>, ctx: &mut ExecutionContext) -> Result<Value, NodeFailure> {
        if let Some(reason) = reason {
            ctx.log(None, LogLevel::Info, format!("sleeping {duration}s: {reason}"));
        }
        tokio::time::sleep(Duration::from_secs_f64(duration.max(0.0))).await;
        Ok(Value::Null)
    }
}

/// Bridge `ExecutionContext`'s `serde_json::Value`-typed merged view into
/// the Safe Expression Evaluator's own `Value` type.
fn expr_context(ctx: &ExecutionContext) -> HashMap<String, expression::Value> {
    ctx.merged_values().iter().map(|(k, v)| (k.clone(), expression::Value::from_json(v))).collect()
}

/// Every node referenced as an `if` branch or a `try_catch` try/catch/
/// finally node. These are excluded from the default main-loop schedule:
/// `if` activates its chosen branch back in; `try_catch` always runs its
/// referenced nodes directly and they stay excluded from the main loop.
fn owned_by_control_flow(definition: &WorkflowDefinition) -> HashSet<NodeId> {
    let mut owned = HashSet::new();
    for node in &definition.nodes {
        match node {
            Node::If { true_branch, false_branch, .. } => {
                owned.insert(true_branch.clone());
                owned.insert(false_branch.clone());
            }
            Node::TryCatch { try_node, catch_node, finally_node, .. } => {
                owned.insert(try_node.clone());
                if let Some(c) = catch_node {
                    owned.insert(c.clone());
                }
                if let Some(f) = finally_node {
                    owned.insert(f.clone());
                }
            }
            _ => {}
        }
    }
    owned
}

/// Every node reachable from `start` (inclusive) by following edges
/// forward.
fn descendants(definition: &WorkflowDefinition, start: &NodeId) -> HashSet<NodeId> {
    let mut adjacency: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for edge in &definition.edges {
        adjacency.entry(&edge.source).or_default().push(&edge.target);
    }

    let mut visited = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id.clone()) {
            continue;
        }
        if let Some(children) = adjacency.get(&node_id) {
            for child in children {
                stack.push((*child).clone());
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::Edge;
    use std::collections::HashMap as Map;

    fn engine(workflows_dir: impl Into<std::path::PathBuf>) -> WorkflowEngine {
        WorkflowEngine::new(
            Arc::new(SessionManager::new(Default::default())),
            Arc::new(ToolDescriptorRegistry::new()),
            Arc::new(WorkflowLoader::new(workflows_dir)),
            Arc::new(EventBus::with_default_capacity()),
        )
    }

    fn set_node(id: &str, variables: &[(&str, &str)]) -> Node {
        Node::Set {
            id: NodeId::from(id),
            variables: variables.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge { source: NodeId::from(source), target: NodeId::from(target) }
    }

    #[tokio::test]
    async fn linear_set_nodes_complete_in_order() {
        let engine = engine(std::env::temp_dir());
        let definition = WorkflowDefinition {
            name: "linear".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![set_node("a", &[("x", "1")]), set_node("b", &[("y", "2")])],
            edges: vec![edge("a", "b")],
            ui_metadata: None,
        };

        let result = engine.execute(&definition, Map::new(), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.results["a"]["x"].as_f64(), Some(1.0));
        assert_eq!(result.results["b"]["y"].as_f64(), Some(2.0));
        assert_eq!(result.node_states["a"], NodeState::Completed);
        assert_eq!(result.node_states["b"], NodeState::Completed);
    }

    #[tokio::test]
    async fn if_node_runs_chosen_branch_and_skips_the_other() {
        let engine = engine(std::env::temp_dir());
        let definition = WorkflowDefinition {
            name: "branching".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![
                set_node("seed", &[("flag", "true")]),
                Node::If {
                    id: NodeId::from("decide"),
                    condition: "flag".to_string(),
                    true_branch: NodeId::from("a"),
                    false_branch: NodeId::from("b"),
                },
                set_node("a", &[("chosen", "1")]),
                set_node("b", &[("chosen", "2")]),
            ],
            edges: vec![edge("seed", "decide"), edge("decide", "a"), edge("decide", "b")],
            ui_metadata: None,
        };

        let result = engine.execute(&definition, Map::new(), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.node_states["a"], NodeState::Completed);
        assert_eq!(result.node_states["b"], NodeState::Skipped);
        assert!(!result.results.contains_key("b"));
    }

    #[tokio::test]
    async fn try_catch_runs_catch_node_and_preserves_its_completed_state() {
        let engine = engine(std::env::temp_dir());
        let definition = WorkflowDefinition {
            name: "recovery".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![
                Node::TryCatch {
                    id: NodeId::from("handle"),
                    try_node: NodeId::from("risky"),
                    catch_node: Some(NodeId::from("recover")),
                    finally_node: None,
                    error_var: "err".to_string(),
                },
                set_node("risky", &[("x", "undefined_identifier")]),
                set_node("recover", &[("recovered", "true")]),
            ],
            edges: vec![],
            ui_metadata: None,
        };

        let result = engine.execute(&definition, Map::new(), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.node_states["risky"], NodeState::Error);
        assert_eq!(result.node_states["recover"], NodeState::Completed);
        assert_eq!(result.results["recover"], serde_json::json!({ "recovered": true }));
        assert!(result.errors.iter().any(|e| e.node_id == NodeId::from("risky")));
    }

    #[tokio::test]
    async fn try_catch_without_failure_skips_the_catch_node() {
        let engine = engine(std::env::temp_dir());
        let definition = WorkflowDefinition {
            name: "no-failure".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![
                Node::TryCatch {
                    id: NodeId::from("handle"),
                    try_node: NodeId::from("safe"),
                    catch_node: Some(NodeId::from("recover")),
                    finally_node: None,
                    error_var: "err".to_string(),
                },
                set_node("safe", &[("x", "1")]),
                set_node("recover", &[("recovered", "true")]),
            ],
            edges: vec![],
            ui_metadata: None,
        };

        let result = engine.execute(&definition, Map::new(), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.node_states["safe"], NodeState::Completed);
        assert_eq!(result.node_states["recover"], NodeState::Skipped);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn for_each_runs_sub_workflow_per_item_and_collects_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        let sub = WorkflowDefinition {
            name: "echo".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![set_node("echo", &[("seen", "1")])],
            edges: vec![],
            ui_metadata: None,
        };
        std::fs::write(dir.path().join("templates").join("echo.json"), serde_json::to_string(&sub).unwrap()).unwrap();

        let engine = engine(dir.path());
        let definition = WorkflowDefinition {
            name: "fan-out".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![Node::ForEach {
                id: NodeId::from("loop"),
                items: "seed".to_string(),
                item_var: "item".to_string(),
                index_var: None,
                sub_workflow: "echo".to_string(),
                max_parallel: 2,
                collect_results: true,
                stop_on_error: true,
            }],
            edges: vec![],
            ui_metadata: None,
        };

        // `items` expressions can only reference an existing identifier, not
        // construct a list literal, so seed the source list the way a real
        // `mcp_call` result would: as a prior node's JSON value.
        let mut ctx = ExecutionContext::new("fan-out", Map::new());
        ctx.results.insert(NodeId::from("seed"), serde_json::json!([1, 2, 3]));

        let result = engine.run(&definition, ctx, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let loop_result = result.results["loop"].as_array().unwrap();
        assert_eq!(loop_result.len(), 3);
        assert!(loop_result.iter().all(|v| v["echo"]["seen"].as_f64() == Some(1.0)));
    }

    #[tokio::test]
    async fn for_each_stop_on_error_aborts_the_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        let sub = WorkflowDefinition {
            name: "fails".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![set_node("boom", &[("x", "undefined_identifier")])],
            edges: vec![],
            ui_metadata: None,
        };
        std::fs::write(dir.path().join("templates").join("fails.json"), serde_json::to_string(&sub).unwrap()).unwrap();

        let engine = engine(dir.path());
        let definition = WorkflowDefinition {
            name: "fan-out-fail".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![Node::ForEach {
                id: NodeId::from("loop"),
                items: "seed".to_string(),
                item_var: "item".to_string(),
                index_var: None,
                sub_workflow: "fails".to_string(),
                max_parallel: 1,
                collect_results: true,
                stop_on_error: true,
            }],
            edges: vec![],
            ui_metadata: None,
        };

        let mut ctx = ExecutionContext::new("fan-out-fail", Map::new());
        ctx.results.insert(NodeId::from("seed"), serde_json::json!([1]));

        let result = engine.run(&definition, ctx, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.node_states["loop"], NodeState::Error);
    }

    #[tokio::test]
    async fn cancel_stops_remaining_nodes() {
        let engine = Arc::new(engine(std::env::temp_dir()));
        let definition = WorkflowDefinition {
            name: "slow".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![
                Node::Sleep { id: NodeId::from("nap"), duration: 0.05, reason: None },
                set_node("after", &[("x", "1")]),
            ],
            edges: vec![edge("nap", "after")],
            ui_metadata: None,
        };

        let exec_engine = engine.clone();
        let def = definition.clone();
        let handle = tokio::spawn(async move { exec_engine.execute(&def, Map::new(), None).await });

        // Give the run loop a moment to register the cancellation flag,
        // then cancel before `after` has a chance to run.
        tokio::time::sleep(Duration::from_millis(5)).await;
        for entry in engine.cancellations.iter() {
            entry.value().store(true, Ordering::SeqCst);
        }

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert!(!result.results.contains_key("after"));
    }

    #[tokio::test]
    async fn start_context_returns_the_same_id_run_keys_cancellation_and_the_result_on() {
        let engine = Arc::new(engine(std::env::temp_dir()));
        let definition = WorkflowDefinition {
            name: "deferred".to_string(),
            version: None,
            description: None,
            parameters: Map::new(),
            nodes: vec![Node::Sleep { id: NodeId::from("nap"), duration: 0.05, reason: None }],
            edges: vec![],
            ui_metadata: None,
        };

        let ctx = engine.start_context(&definition, Map::new()).unwrap();
        let claimed_id = ctx.id;

        // Cancel using the id handed back before `run` ever starts, exactly
        // as an HTTP client would after reading the `start_execution`
        // response's `execution_id`.
        engine.cancel(claimed_id);

        let result = engine.run(&definition, ctx, None).await.unwrap();
        assert_eq!(result.id, claimed_id);
        assert_eq!(result.status, ExecutionStatus::Cancelled);
    }
}
