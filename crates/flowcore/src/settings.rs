use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a node's task is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Driven cooperatively by the workflow's controlling thread, interleaved
    /// with every other main-thread node at suspension points.
    MainThread,
    /// Runs on a dedicated worker thread.
    #[default]
    Parallel,
}

impl std::fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingMode::MainThread => f.write_str("main-thread"),
            SchedulingMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// What the workflow does when a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Fail fast: shut the remaining graph down.
    #[default]
    StopWorkflow,
    /// Keep unaffected branches running until they terminate on their own.
    ContinueOnError,
}

/// Global workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub on_error: ErrorHandling,
    /// Shared deadline for joining every node during shutdown.
    pub join_timeout_ms: u64,
    /// Step budget used by `execute()` between checks for termination.
    pub tick_ms: u64,
    /// Read timeout applied to nodes that do not set their own.
    pub default_read_timeout_ms: Option<u64>,
    pub event_buffer_size: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            on_error: ErrorHandling::StopWorkflow,
            join_timeout_ms: 5_000,
            tick_ms: 50,
            default_read_timeout_ms: None,
            event_buffer_size: 1000,
        }
    }
}

impl WorkflowSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_error_handling(mut self, on_error: ErrorHandling) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_default_read_timeout(mut self, timeout: Duration) -> Self {
        self.default_read_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn default_read_timeout(&self) -> Option<Duration> {
        self.default_read_timeout_ms.map(Duration::from_millis)
    }
}
