use crate::node::Node;
use chrono::{DateTime, Utc};
use flowcore::{AggregateExecutionError, ExecutionId, NodeError, SchedulingMode, TaskState};
use serde::{Serialize, Serializer};

/// Outcome of one workflow execution: every node's final state and error.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// The execution ended because the stop token was cancelled.
    pub stopped_by_signal: bool,
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub mode: SchedulingMode,
    pub kind: String,
    pub state: TaskState,
    #[serde(serialize_with = "as_message")]
    pub error: Option<NodeError>,
    #[serde(serialize_with = "as_message")]
    pub cleanup_error: Option<NodeError>,
    pub duration_ms: Option<u64>,
}

impl NodeReport {
    pub(crate) fn from_node(node: &Node) -> Self {
        Self {
            name: node.name().to_string(),
            mode: node.mode(),
            kind: node.kind().to_string(),
            state: node.state(),
            error: node.error(),
            cleanup_error: node.cleanup_error(),
            duration_ms: node.duration().map(|d| d.as_millis() as u64),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }
}

impl ExecutionReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|node| node.is_failed())
    }

    /// No node failed. Cleanup errors do not count.
    pub fn is_success(&self) -> bool {
        self.failed_nodes().next().is_none()
    }

    /// Collapse every node failure into one error.
    pub fn into_result(self) -> Result<Self, AggregateExecutionError> {
        let failures: Vec<NodeError> = self
            .nodes
            .iter()
            .filter_map(|node| node.error.clone())
            .collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(AggregateExecutionError {
                workflow: self.workflow,
                failures,
            })
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "workflow '{}' ({}) finished in {}ms",
            self.workflow, self.execution_id, self.duration_ms
        )?;
        for node in &self.nodes {
            write!(f, "  {:<16} {:<12} {}", node.name, node.mode, node.state)?;
            if let Some(error) = &node.error {
                write!(f, ": {}", error)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn as_message<S: Serializer>(error: &Option<NodeError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}
