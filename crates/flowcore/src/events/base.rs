use crate::SchedulingMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node: String,
        mode: SchedulingMode,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        execution_id: ExecutionId,
        node: String,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::WorkflowStarted { execution_id, .. }
            | ExecutionEvent::WorkflowCompleted { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeCompleted { execution_id, .. }
            | ExecutionEvent::NodeFailed { execution_id, .. }
            | ExecutionEvent::NodeEvent { execution_id, .. } => *execution_id,
        }
    }

    /// Node the event is about, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            ExecutionEvent::NodeStarted { node, .. }
            | ExecutionEvent::NodeCompleted { node, .. }
            | ExecutionEvent::NodeFailed { node, .. }
            | ExecutionEvent::NodeEvent { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Out-of-band notices a node reports while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
}

/// Per-node handle onto the event bus
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        node: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            node: node.into(),
            sender,
        }
    }

    pub fn started(&self, mode: SchedulingMode) {
        self.send(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node: self.node.clone(),
            mode,
            timestamp: Utc::now(),
        });
    }

    pub fn completed(&self, duration_ms: u64) {
        self.send(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id,
            node: self.node.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn failed(&self, error: impl ToString) {
        self.send(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node: self.node.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Emit a node-specific event
    pub fn emit(&self, event: NodeEvent) {
        self.send(ExecutionEvent::NodeEvent {
            execution_id: self.execution_id,
            node: self.node.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    fn send(&self, event: ExecutionEvent) {
        // No subscribers is the common case.
        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("execution_id", &self.execution_id)
            .field("node", &self.node)
            .finish()
    }
}

/// Broadcast bus for execution events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, node: impl Into<String>) -> EventEmitter {
        EventEmitter::new(execution_id, node, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
