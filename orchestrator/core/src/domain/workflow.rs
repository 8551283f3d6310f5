// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow domain model: a [`WorkflowDefinition`] is an immutable,
//! typed-node DAG loaded from disk. Node shapes vary by `type`; rather than
//! carrying a dynamically-typed params bag at the type level, each variant
//! of [`Node`] owns its own fields so handler dispatch in the Workflow
//! Engine is exhaustive (spec.md §9, "Dynamically typed node parameters →
//! tagged variants").

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier for a node within one [`WorkflowDefinition`]. Plain `String`
/// (not a uuid newtype) because node ids are author-chosen, stable
/// across reloads, and used as map keys throughout the Engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An edge `(source, target)` in the node DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

/// One node in the DAG, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    McpCall {
        id: NodeId,
        mcp_server: String,
        tool: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    If {
        id: NodeId,
        condition: String,
        true_branch: NodeId,
        false_branch: NodeId,
    },
    ForEach {
        id: NodeId,
        /// An expression string evaluating to a list.
        items: String,
        item_var: String,
        #[serde(default)]
        index_var: Option<String>,
        sub_workflow: String,
        max_parallel: usize,
        #[serde(default)]
        collect_results: bool,
        #[serde(default)]
        stop_on_error: bool,
    },
    TryCatch {
        id: NodeId,
        try_node: NodeId,
        #[serde(default)]
        catch_node: Option<NodeId>,
        #[serde(default)]
        finally_node: Option<NodeId>,
        error_var: String,
    },
    SubWorkflow {
        id: NodeId,
        workflow: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    Set {
        id: NodeId,
        /// Each value is an expression string, resolved at node execution.
        variables: HashMap<String, String>,
    },
    Sleep {
        id: NodeId,
        duration: f64,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::McpCall { id, .. }
            | Node::If { id, .. }
            | Node::ForEach { id, .. }
            | Node::TryCatch { id, .. }
            | Node::SubWorkflow { id, .. }
            | Node::Set { id, .. }
            | Node::Sleep { id, .. } => id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::McpCall { .. } => "mcp_call",
            Node::If { .. } => "if",
            Node::ForEach { .. } => "for_each",
            Node::TryCatch { .. } => "try_catch",
            Node::SubWorkflow { .. } => "sub_workflow",
            Node::Set { .. } => "set",
            Node::Sleep { .. } => "sleep",
        }
    }
}

/// An immutable workflow document, once loaded. `nodes` preserves the
/// declaration order from the source document — the Engine's topological
/// tie-break rule depends on this order (SPEC_FULL §E.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub ui_metadata: Option<Value>,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow references unknown node id: {0}")]
    UnknownNode(NodeId),
    #[error("workflow node DAG contains a cycle")]
    Cycle,
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    #[error("workflow document is malformed: {0}")]
    Malformed(String),
}

impl WorkflowDefinition {
    /// Validate structural invariants (spec.md §3): every edge endpoint
    /// references a declared node, node ids are unique, and a topological
    /// ordering exists (no cycles).
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id().clone()) {
                return Err(WorkflowError::DuplicateNode(node.id().clone()));
            }
        }
        for edge in &self.edges {
            if !seen.contains(&edge.source) {
                return Err(WorkflowError::UnknownNode(edge.source.clone()));
            }
            if !seen.contains(&edge.target) {
                return Err(WorkflowError::UnknownNode(edge.target.clone()));
            }
        }
        // Branch/handler node id references must also resolve.
        for node in &self.nodes {
            let refs: Vec<&NodeId> = match node {
                Node::If { true_branch, false_branch, .. } => vec![true_branch, false_branch],
                Node::TryCatch { try_node, catch_node, finally_node, .. } => {
                    let mut v = vec![try_node];
                    if let Some(c) = catch_node {
                        v.push(c);
                    }
                    if let Some(f) = finally_node {
                        v.push(f);
                    }
                    v
                }
                _ => vec![],
            };
            for r in refs {
                if !seen.contains(r) {
                    return Err(WorkflowError::UnknownNode(r.clone()));
                }
            }
        }
        self.topological_order()?;
        Ok(())
    }

    pub fn node_table(&self) -> HashMap<NodeId, &Node> {
        self.nodes.iter().map(|n| (n.id().clone(), n)).collect()
    }

    /// Kahn's algorithm, ties broken by input node order (the order nodes
    /// appear in `self.nodes`) — deterministic and independent of edge
    /// declaration order (SPEC_FULL §E.3, resolving spec.md §9's open
    /// question on tie-breaking).
    pub fn topological_order(&self) -> Result<Vec<NodeId>, WorkflowError> {
        let index_of: HashMap<&NodeId, usize> =
            self.nodes.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();

        let mut in_degree: HashMap<NodeId, usize> =
            self.nodes.iter().map(|n| (n.id().clone(), 0)).collect();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> =
            self.nodes.iter().map(|n| (n.id().clone(), Vec::new())).collect();

        for edge in &self.edges {
            adjacency
                .get_mut(&edge.source)
                .ok_or_else(|| WorkflowError::UnknownNode(edge.source.clone()))?
                .push(edge.target.clone());
            *in_degree
                .get_mut(&edge.target)
                .ok_or_else(|| WorkflowError::UnknownNode(edge.target.clone()))? += 1;
        }

        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort_by_key(|id| index_of[id]);
        let mut queue: VecDeque<NodeId> = ready.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = queue.pop_front() {
            order.push(next.clone());
            if let Some(children) = adjacency.get(&next) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let deg = in_degree.get_mut(child).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(child.clone());
                    }
                }
                newly_ready.sort_by_key(|id| index_of[id]);
                // Merge newly_ready into queue keeping overall stable order:
                // re-sort the whole ready frontier by input index each pass.
                let mut frontier: Vec<NodeId> = queue.drain(..).chain(newly_ready).collect();
                frontier.sort_by_key(|id| index_of[id]);
                queue = frontier.into();
            }
        }

        if order.len() != self.nodes.len() {
            return Err(WorkflowError::Cycle);
        }
        Ok(order)
    }
}
