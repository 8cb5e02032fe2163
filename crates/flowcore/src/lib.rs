//! Core abstractions for the flow engine
//!
//! This crate provides the channels, the task contract and the shared error
//! and settings types that the runtime and the node library build on.

pub mod channel;
mod context;
mod error;
pub mod events;
mod settings;
mod task;

pub use channel::{Channel, ChannelControl, ChannelKind, Endpoint, QueueChannel, SingleItemChannel};
pub use context::TaskContext;
pub use error::{
    AggregateExecutionError, ChannelError, Direction, FlowError, NodeError, TaskError,
    WorkflowError,
};
pub use events::*;
pub use settings::{ErrorHandling, SchedulingMode, WorkflowSettings};
pub use task::{RunOutcome, Task, TaskState};

/// Cooperative cancellation signal shared by a workflow and its nodes.
pub type StopToken = tokio_util::sync::CancellationToken;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
