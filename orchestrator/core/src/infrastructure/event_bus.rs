// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory pub/sub for [`DomainEvent`]s, backed by a `tokio::sync::broadcast`
//! channel. The Workflow Engine's progress callback and the presentation
//! layer's SSE handler are both subscribers here rather than direct
//! callees, so a slow consumer cannot block node execution
//! (SPEC_FULL §E.3).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::{DomainEvent, WorkflowProgressEvent};
use crate::domain::execution::ExecutionId;

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender: Arc::new(sender) }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn publish_workflow_event(&self, event: WorkflowProgressEvent) {
        self.publish(DomainEvent::Workflow(event));
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    /// A receiver filtered to progress events for one execution — the
    /// shape the Workflow Engine's caller-supplied progress callback
    /// ultimately drains (spec.md §4.3).
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionEventReceiver {
        ExecutionEventReceiver { receiver: self.sender.subscribe(), execution_id }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,
    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_err)
    }
}

pub struct ExecutionEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    execution_id: ExecutionId,
}

impl ExecutionEventReceiver {
    pub async fn recv(&mut self) -> Result<WorkflowProgressEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_err)?;
            if let DomainEvent::Workflow(w) = event {
                if w.execution_id() == self.execution_id {
                    return Ok(w);
                }
            }
        }
    }
}

fn map_recv_err(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("event bus receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{ExecutionStatus, NodeState};
    use crate::domain::workflow::NodeId;
    use chrono::Utc;

    #[tokio::test]
    async fn execution_filter_ignores_other_executions() {
        let bus = EventBus::new(10);
        let exec_id = ExecutionId::new();
        let other_id = ExecutionId::new();
        let mut rx = bus.subscribe_execution(exec_id);

        bus.publish_workflow_event(WorkflowProgressEvent::ExecutionFinished {
            execution_id: other_id,
            status: ExecutionStatus::Completed,
            at: Utc::now(),
        });
        bus.publish_workflow_event(WorkflowProgressEvent::NodeStateChanged {
            execution_id: exec_id,
            node_id: NodeId::from("A"),
            status: NodeState::Running,
            node_states_snapshot: Default::default(),
            at: Utc::now(),
        });

        let got = rx.recv().await.unwrap();
        assert_eq!(got.execution_id(), exec_id);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(10);
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish_workflow_event(WorkflowProgressEvent::ExecutionFinished {
            execution_id: ExecutionId::new(),
            status: ExecutionStatus::Completed,
            at: Utc::now(),
        });

        assert!(r1.recv().await.is_ok());
        assert!(r2.recv().await.is_ok());
    }
}
