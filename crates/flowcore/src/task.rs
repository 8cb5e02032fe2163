use crate::{TaskContext, TaskError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Core trait every unit of work implements.
///
/// A task is owned by exactly one node, which drives it through
/// `setup` → `run` → `cleanup`. `cleanup` is called even when `setup` or
/// `run` failed.
#[async_trait]
pub trait Task: Send {
    /// Short type identifier used in logs and graph labels
    /// (e.g. "transformer", "polling").
    fn kind(&self) -> &str {
        "task"
    }

    /// Optional: acquire resources before the first run.
    async fn setup(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Do the work. Reads and writes go through `ctx`.
    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError>;

    /// Optional: release resources. Failures here are logged by the owning
    /// node and never escalate further.
    async fn cleanup(&mut self) -> Result<(), TaskError> {
        Ok(())
    }
}

#[async_trait]
impl Task for Box<dyn Task> {
    fn kind(&self) -> &str {
        (**self).kind()
    }

    async fn setup(&mut self) -> Result<(), TaskError> {
        (**self).setup().await
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        (**self).run(ctx).await
    }

    async fn cleanup(&mut self) -> Result<(), TaskError> {
        (**self).cleanup().await
    }
}

/// Result of one `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The invocation did its work.
    Completed,
    /// The input stream (or the task's own sequence) has ended; invoking
    /// `run` again cannot make progress.
    Exhausted,
}

/// Lifecycle state of a node's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Stopped | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Created => "created",
            TaskState::Initialized => "initialized",
            TaskState::Running => "running",
            TaskState::Stopped => "stopped",
            TaskState::Failed => "failed",
        };
        f.write_str(label)
    }
}
