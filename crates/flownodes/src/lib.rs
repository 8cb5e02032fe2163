//! Standard task library
//!
//! Adapters that wrap plain functions and streams into tasks, plus the
//! polling and hook decorators that compose around any task.

mod debug;
mod func;
mod hooks;
mod polling;
mod stream;

pub use debug::DebugSink;
pub use func::{BatchConsumer, Consumer, ContextTask, Producer, Transformer};
pub use hooks::{TaskExt, WithHooks};
pub use polling::PollingTask;
pub use stream::StreamingProducer;
