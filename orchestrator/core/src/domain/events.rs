// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Progress event types published on the broadcast event bus
//! (`infrastructure::event_bus`). The Workflow Engine's caller-supplied
//! progress callback (spec.md §4.3) is realised as a subscriber draining
//! this channel, so a slow consumer can never block the Engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::{ExecutionId, ExecutionStatus, NodeState};
use crate::domain::package::InstallationStatus;
use crate::domain::registry_config::RegistryHealthStatus;
use crate::domain::workflow::NodeId;

/// `{type, node_id, status, node_states_snapshot}` per spec.md §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowProgressEvent {
    NodeStateChanged {
        execution_id: ExecutionId,
        node_id: NodeId,
        status: NodeState,
        node_states_snapshot: std::collections::HashMap<String, NodeState>,
        at: DateTime<Utc>,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    },
}

impl WorkflowProgressEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            WorkflowProgressEvent::NodeStateChanged { execution_id, .. } => *execution_id,
            WorkflowProgressEvent::ExecutionFinished { execution_id, .. } => *execution_id,
        }
    }
}

/// Lifecycle events for package/container operations, surfaced to CLI and
/// SSE observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PackageLifecycleEvent {
    InstallStarted { package: String, version: String, transaction_id: String },
    InstallCompleted { package: String, version: String, transaction_id: String },
    InstallRolledBack { package: String, transaction_id: String, reason: String },
    StatusChanged { package: String, status: InstallationStatus },
}

/// Registry health transitions, emitted whenever `HealthMetrics::status`
/// changes or the circuit breaker opens/closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryHealthEvent {
    StatusChanged { registry: String, status: RegistryHealthStatus },
    CircuitOpened { registry: String, cooldown_seconds: u64 },
    CircuitClosed { registry: String },
}

/// The unified envelope published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum DomainEvent {
    Workflow(WorkflowProgressEvent),
    Package(PackageLifecycleEvent),
    Registry(RegistryHealthEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_reads_through_either_variant() {
        let id = ExecutionId::new();
        let changed = WorkflowProgressEvent::NodeStateChanged {
            execution_id: id,
            node_id: NodeId::from("step1"),
            status: NodeState::Completed,
            node_states_snapshot: std::collections::HashMap::new(),
            at: Utc::now(),
        };
        assert_eq!(changed.execution_id(), id);

        let finished = WorkflowProgressEvent::ExecutionFinished { execution_id: id, status: ExecutionStatus::Completed, at: Utc::now() };
        assert_eq!(finished.execution_id(), id);
    }

    #[test]
    fn domain_event_serialises_with_a_discriminating_channel_tag() {
        let event = DomainEvent::Registry(RegistryHealthEvent::CircuitOpened { registry: "flaky".to_string(), cooldown_seconds: 60 });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["channel"], "registry");
        assert_eq!(value["registry"], "flaky");
        assert_eq!(value["cooldown_seconds"], 60);
    }
}
