//! Graph description and rendering.
//!
//! The workflow only produces a [`GraphDescription`]; turning it into a
//! diagram is up to a [`GraphRenderer`].

use crate::workflow::EdgeKind;
use flowcore::SchedulingMode;
use petgraph::dot::Dot;
use petgraph::graph::DiGraph;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct GraphDescription {
    pub workflow: String,
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<EdgeDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    pub name: String,
    pub mode: SchedulingMode,
    pub kind: String,
    /// Position in the start order; `None` while the graph has a cycle.
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl std::fmt::Display for NodeDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}, {}", self.name, self.kind, self.mode)?;
        if let Some(position) = self.position {
            write!(f, ", #{}", position)?;
        }
        f.write_str("]")
    }
}

pub trait GraphRenderer {
    type Output;

    fn render(&self, graph: &GraphDescription) -> Self::Output;
}

/// Renders Graphviz DOT.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotRenderer;

impl GraphRenderer for DotRenderer {
    type Output = String;

    fn render(&self, description: &GraphDescription) -> String {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let mut indices = HashMap::new();

        for node in &description.nodes {
            let idx = graph.add_node(node.to_string());
            indices.insert(node.name.as_str(), idx);
        }
        for edge in &description.edges {
            if let (Some(&from), Some(&to)) = (
                indices.get(edge.from.as_str()),
                indices.get(edge.to.as_str()),
            ) {
                graph.add_edge(from, to, edge.kind.to_string());
            }
        }

        format!("{}", Dot::with_config(&graph, &[]))
    }
}
