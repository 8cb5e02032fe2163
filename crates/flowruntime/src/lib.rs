//! Workflow execution runtime
//!
//! This crate provides the node scheduling wrapper and the workflow that
//! wires nodes together with channels, validates the graph and drives it
//! from start-up to shutdown.

mod executor;
mod node;
mod report;
pub mod visualize;
mod workflow;

pub use executor::Execution;
pub use node::Node;
pub use report::{ExecutionReport, NodeReport};
pub use visualize::{DotRenderer, GraphDescription, GraphRenderer};
pub use workflow::{EdgeKind, Workflow};
