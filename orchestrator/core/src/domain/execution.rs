// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-run execution state for the Workflow Engine: [`ExecutionContext`] is
//! the mutable workspace owned exclusively by one execution; [`ExecutionResult`]
//! is its immutable, persisted summary.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::workflow::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
}

/// A structured log line, appended to both the in-memory context and the
/// per-execution JSONL log file (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub execution_id: ExecutionId,
    pub node_id: Option<NodeId>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One recorded node failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeError {
    pub node_id: NodeId,
    pub message: String,
    pub error_type: String,
}

/// Terminal status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The per-run mutable workspace. Owned exclusively by one execution;
/// copies created for sub-workflow invocations never alias the parent's
/// maps (spec.md §3, §4.3.4).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub id: ExecutionId,
    pub workflow_name: String,
    pub params: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub results: HashMap<NodeId, Value>,
    pub variables: HashMap<String, Value>,
    pub node_states: HashMap<NodeId, NodeState>,
    pub logs: Vec<ExecutionLogEntry>,
    pub errors: Vec<NodeError>,
    pub cumulative_tokens: u64,
}

impl ExecutionContext {
    pub fn new(workflow_name: impl Into<String>, params: HashMap<String, Value>) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_name: workflow_name.into(),
            params,
            started_at: Utc::now(),
            results: HashMap::new(),
            variables: HashMap::new(),
            node_states: HashMap::new(),
            logs: Vec::new(),
            errors: Vec::new(),
            cumulative_tokens: 0,
        }
    }

    /// A context for a sub-workflow invocation: a fresh id, seeded only
    /// from the resolved `params` passed to the `sub_workflow` node, never
    /// aliasing the parent's `results`/`variables`.
    pub fn for_sub_workflow(workflow_name: impl Into<String>, params: HashMap<String, Value>) -> Self {
        Self::new(workflow_name, params)
    }

    pub fn log(&mut self, node_id: Option<NodeId>, level: LogLevel, message: impl Into<String>) {
        self.logs.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            execution_id: self.id,
            node_id,
            level,
            message: message.into(),
        });
    }

    /// Merged view of `results` (by node id) and `variables`, the lookup
    /// table the Safe Expression Evaluator and template substitution read
    /// identifiers from.
    pub fn merged_values(&self) -> HashMap<String, Value> {
        let mut merged: HashMap<String, Value> = self
            .results
            .iter()
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect();
        for (k, v) in &self.variables {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            "params".to_string(),
            Value::Object(self.params.clone().into_iter().collect()),
        );
        merged
    }

    pub fn into_result(self, status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            id: self.id,
            status,
            results: self.results.into_iter().map(|(k, v)| (k.0, v)).collect(),
            errors: self.errors,
            logs: self.logs,
            node_states: self.node_states.into_iter().map(|(k, v)| (k.0, v)).collect(),
            cumulative_tokens: self.cumulative_tokens,
            reference: None,
        }
    }
}

/// Immutable, persisted outcome of one execution (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    pub results: HashMap<String, Value>,
    pub errors: Vec<NodeError>,
    pub logs: Vec<ExecutionLogEntry>,
    pub node_states: HashMap<String, NodeState>,
    pub cumulative_tokens: u64,
    /// Optional domain-specific reference a caller may want to correlate
    /// against (e.g. a scan id); never populated by the Engine itself.
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merged_values_spreads_results_and_variables_and_nests_params() {
        let mut params = HashMap::new();
        params.insert("target".to_string(), json!("example.com"));
        let mut ctx = ExecutionContext::new("scan", params);
        ctx.results.insert(NodeId::from("fetch"), json!({"status": 200}));
        ctx.variables.insert("retries".to_string(), json!(3));

        let merged = ctx.merged_values();
        assert_eq!(merged.get("fetch"), Some(&json!({"status": 200})));
        assert_eq!(merged.get("retries"), Some(&json!(3)));
        assert_eq!(merged.get("params"), Some(&json!({"target": "example.com"})));
    }

    #[test]
    fn for_sub_workflow_never_inherits_parent_results_or_variables() {
        let mut parent = ExecutionContext::new("parent", HashMap::new());
        parent.results.insert(NodeId::from("a"), json!(1));
        parent.variables.insert("v".to_string(), json!(2));

        let mut sub_params = HashMap::new();
        sub_params.insert("item".to_string(), json!("x"));
        let child = ExecutionContext::for_sub_workflow("child", sub_params);

        assert!(child.results.is_empty());
        assert!(child.variables.is_empty());
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn into_result_converts_node_id_keys_to_plain_strings() {
        let mut ctx = ExecutionContext::new("wf", HashMap::new());
        ctx.results.insert(NodeId::from("step1"), json!("done"));
        ctx.node_states.insert(NodeId::from("step1"), NodeState::Completed);

        let result = ctx.into_result(ExecutionStatus::Completed);
        assert_eq!(result.results.get("step1"), Some(&json!("done")));
        assert_eq!(result.node_states.get("step1"), Some(&NodeState::Completed));
        assert_eq!(result.status, ExecutionStatus::Completed);
    }
}
