use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by channel operations and by the context lookups that
/// resolve a channel from a peer name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Node '{node}' has no {direction} channel")]
    NotConnected { node: String, direction: Direction },

    #[error("Node '{node}' has {count} {direction} channels; name the peer explicitly")]
    Ambiguous {
        node: String,
        direction: Direction,
        count: usize,
    },

    #[error("Node '{node}' has no channel connected to '{peer}'")]
    UnknownPeer { node: String, peer: String },

    #[error("Channel to '{peer}' carries {actual}, not {expected}")]
    TypeMismatch {
        peer: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Side of a node a channel is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Error returned by a task phase.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Wrap any error type, keeping only its rendered message.
    pub fn from_error(err: impl std::error::Error) -> Self {
        TaskError::Failed(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Node '{node}' setup failed: {source}")]
    Setup { node: String, source: TaskError },

    #[error("Node '{node}' failed: {source}")]
    Runtime { node: String, source: TaskError },

    #[error("Node '{node}' cleanup failed: {source}")]
    Cleanup { node: String, source: TaskError },

    #[error("Node '{node}' did not finish within {waited:?}")]
    Timeout { node: String, waited: Duration },

    #[error("Node '{node}' panicked")]
    Panicked { node: String },

    #[error("Failed to spawn worker for node '{node}': {message}")]
    Spawn { node: String, message: String },

    #[error("Node '{node}' is {state} and cannot {action}")]
    InvalidState {
        node: String,
        state: String,
        action: &'static str,
    },
}

impl NodeError {
    /// Name of the node the error belongs to.
    pub fn node(&self) -> &str {
        match self {
            NodeError::Setup { node, .. }
            | NodeError::Runtime { node, .. }
            | NodeError::Cleanup { node, .. }
            | NodeError::Timeout { node, .. }
            | NodeError::Panicked { node }
            | NodeError::Spawn { node, .. }
            | NodeError::InvalidState { node, .. } => node,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Cyclic dependency detected at node '{node}'")]
    CyclicDependency { node: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cannot execute a workflow without any nodes")]
    Empty,

    #[error("Workflow is {state} and cannot {action}")]
    InvalidState { state: String, action: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aggregate(#[from] AggregateExecutionError),
}

/// Every node failure collected during one workflow execution.
#[derive(Error, Debug, Clone)]
#[error("Workflow '{workflow}' finished with {} failed node(s): {}", .failures.len(), summary(.failures))]
pub struct AggregateExecutionError {
    pub workflow: String,
    pub failures: Vec<NodeError>,
}

fn summary(failures: &[NodeError]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_failure() {
        let err = AggregateExecutionError {
            workflow: "pipeline".to_string(),
            failures: vec![
                NodeError::Runtime {
                    node: "doubler".to_string(),
                    source: TaskError::failed("boom"),
                },
                NodeError::Panicked {
                    node: "sink".to_string(),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("2 failed node(s)"));
        assert!(message.contains("Node 'doubler' failed: boom"));
        assert!(message.contains("Node 'sink' panicked"));
    }

    #[test]
    fn node_error_reports_its_node() {
        let err = NodeError::Timeout {
            node: "slow".to_string(),
            waited: Duration::from_millis(10),
        };
        assert_eq!(err.node(), "slow");
    }
}
