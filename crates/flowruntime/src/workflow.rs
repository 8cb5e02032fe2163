use crate::executor::Execution;
use crate::node::Node;
use crate::report::ExecutionReport;
use crate::visualize::{EdgeDescription, GraphDescription, GraphRenderer, NodeDescription};
use flowcore::{
    Channel, ChannelControl, ChannelKind, Endpoint, EventBus, ExecutionEvent, StopToken,
    WorkflowError, WorkflowSettings,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Kind of an edge in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Carries a channel; also orders the source before the destination.
    Dataflow { channel: ChannelKind },
    /// Ordering only.
    Dependency,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Dataflow { channel } => write!(f, "{}", channel),
            EdgeKind::Dependency => f.write_str("depends"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Building,
    Validated,
    Running,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Building => "building",
            Phase::Validated => "validated",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// A channel wired into the graph, tracked for source checks and teardown.
struct Binding {
    source: String,
    destination: String,
    control: Arc<dyn ChannelControl>,
}

/// Owner and orchestrator of a graph of nodes.
///
/// Nodes are joined by dataflow edges (a channel plus start ordering) and
/// dependency edges (start ordering only). The union of both must be acyclic.
pub struct Workflow {
    name: String,
    settings: WorkflowSettings,
    pub(crate) nodes: Vec<Node>,
    index: HashMap<String, NodeIndex>,
    graph: DiGraph<String, EdgeKind>,
    bindings: Vec<Binding>,
    pub(crate) stop: StopToken,
    pub(crate) events: EventBus,
    pub(crate) phase: Phase,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, WorkflowSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, settings: WorkflowSettings) -> Self {
        let events = EventBus::new(settings.event_buffer_size);
        Self {
            name: name.into(),
            settings,
            nodes: Vec::new(),
            index: HashMap::new(),
            graph: DiGraph::new(),
            bindings: Vec::new(),
            stop: StopToken::new(),
            events,
            phase: Phase::Building,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Attach a node. Names are unique within a workflow.
    pub fn add_node(&mut self, mut node: Node) -> Result<&mut Self, WorkflowError> {
        self.ensure_editable("add nodes")?;
        if self.index.contains_key(node.name()) {
            return Err(WorkflowError::DuplicateName(node.name().to_string()));
        }

        node.set_stop_token(self.stop.child_token());
        let idx = self.graph.add_node(node.name().to_string());
        debug_assert_eq!(idx.index(), self.nodes.len());
        self.index.insert(node.name().to_string(), idx);
        tracing::debug!(workflow = %self.name, node = %node.name(), mode = %node.mode(), "node added");
        self.nodes.push(node);
        self.phase = Phase::Building;
        Ok(self)
    }

    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<&mut Self, WorkflowError> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(self)
    }

    /// Add nodes and chain them with dependency edges in the given order.
    pub fn add_sequence(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<&mut Self, WorkflowError> {
        let mut previous: Option<String> = None;
        for node in nodes {
            let name = node.name().to_string();
            self.add_node(node)?;
            if let Some(upstream) = previous.take() {
                self.connect_dependency(&upstream, &name)?;
            }
            previous = Some(name);
        }
        Ok(self)
    }

    /// Wire `channel` as the outbound end of `source` and the inbound end of
    /// `destination`.
    pub fn connect_dataflow<T, C>(
        &mut self,
        source: &str,
        destination: &str,
        channel: Arc<C>,
    ) -> Result<&mut Self, WorkflowError>
    where
        T: Send + 'static,
        C: Channel<T> + 'static,
    {
        self.ensure_editable("connect nodes")?;
        let from = self.lookup(source)?;
        let to = self.lookup(destination)?;

        let control: Arc<dyn ChannelControl> = channel.clone();
        for binding in &self.bindings {
            if !same_channel(&binding.control, &control) {
                continue;
            }
            if binding.source != source {
                return Err(WorkflowError::InvalidConnection(format!(
                    "channel already carries data from '{}'; it cannot also be fed by '{}'",
                    binding.source, source
                )));
            }
            if binding.destination == destination {
                return Err(WorkflowError::InvalidConnection(format!(
                    "'{}' -> '{}' is already wired through this channel",
                    source, destination
                )));
            }
        }

        let kind = control.kind();
        self.nodes[from.index()].attach_output(Endpoint::new(destination, channel.clone()));
        self.nodes[to.index()].attach_input(Endpoint::new(source, channel));
        self.graph.add_edge(from, to, EdgeKind::Dataflow { channel: kind });
        self.bindings.push(Binding {
            source: source.to_string(),
            destination: destination.to_string(),
            control,
        });
        self.phase = Phase::Building;

        tracing::debug!(workflow = %self.name, %source, %destination, channel = %kind, "dataflow edge added");
        Ok(self)
    }

    /// Order `upstream` before `downstream` without moving data between them.
    /// Adding the same dependency twice is a no-op.
    pub fn connect_dependency(&mut self, upstream: &str, downstream: &str) -> Result<&mut Self, WorkflowError> {
        self.ensure_editable("connect nodes")?;
        let from = self.lookup(upstream)?;
        let to = self.lookup(downstream)?;

        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|edge| *edge.weight() == EdgeKind::Dependency);
        if !exists {
            self.graph.add_edge(from, to, EdgeKind::Dependency);
            self.phase = Phase::Building;
            tracing::debug!(workflow = %self.name, %upstream, %downstream, "dependency edge added");
        }
        Ok(self)
    }

    /// Dependency edge plus dataflow edge in one call.
    pub fn connect<T, C>(
        &mut self,
        source: &str,
        destination: &str,
        channel: Arc<C>,
    ) -> Result<&mut Self, WorkflowError>
    where
        T: Send + 'static,
        C: Channel<T> + 'static,
    {
        self.connect_dependency(source, destination)?;
        self.connect_dataflow(source, destination, channel)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|idx| &self.nodes[idx.index()])
    }

    /// Node names in insertion order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(Node::name).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check that the graph can be executed: it has nodes and the union of
    /// both edge kinds is acyclic.
    pub fn validate(&mut self) -> Result<(), WorkflowError> {
        self.ensure_editable("be validated")?;
        self.topological_order()?;
        self.phase = Phase::Validated;
        Ok(())
    }

    /// Start order consistent with every edge.
    pub fn start_order(&self) -> Result<Vec<&str>, WorkflowError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|idx| self.nodes[idx].name())
            .collect())
    }

    /// Clonable stop signal. Cancelling it from any thread shuts the running
    /// execution down.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Serializable view of the node and edge set.
    pub fn describe(&self) -> GraphDescription {
        let positions: HashMap<usize, usize> = self
            .topological_order()
            .map(|order| {
                order
                    .into_iter()
                    .enumerate()
                    .map(|(position, idx)| (idx, position))
                    .collect()
            })
            .unwrap_or_default();

        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| NodeDescription {
                name: node.name().to_string(),
                mode: node.mode(),
                kind: node.kind().to_string(),
                position: positions.get(&idx).copied(),
            })
            .collect();

        let edges = self
            .graph
            .edge_references()
            .map(|edge| EdgeDescription {
                from: self.graph[edge.source()].clone(),
                to: self.graph[edge.target()].clone(),
                kind: *edge.weight(),
            })
            .collect();

        GraphDescription {
            workflow: self.name.clone(),
            nodes,
            edges,
        }
    }

    /// Hand the graph description to `renderer`. Has no effect on execution.
    pub fn visualize<R: GraphRenderer>(&self, renderer: &R) -> R::Output {
        renderer.render(&self.describe())
    }

    /// Validate and start every node, returning a handle the caller steps
    /// until the execution shuts down.
    ///
    /// Must be called from synchronous code: the execution owns its own
    /// runtime.
    pub fn start(&mut self) -> Result<Execution<'_>, WorkflowError> {
        match self.phase {
            Phase::Running | Phase::Stopped => {
                return Err(WorkflowError::InvalidState {
                    state: self.phase.to_string(),
                    action: "execute",
                })
            }
            Phase::Building => self.validate()?,
            Phase::Validated => {}
        }

        let order = self.topological_order()?;
        Execution::launch(self, order)
    }

    /// Run the workflow to completion, external stop, or fail-fast shutdown.
    ///
    /// Node failures do not make this return `Err`; they are listed in the
    /// report. Use [`ExecutionReport::into_result`] to turn them into one
    /// aggregate error.
    pub fn execute(&mut self) -> Result<ExecutionReport, WorkflowError> {
        let tick = self.settings.tick();
        let mut execution = self.start()?;
        while execution.step(tick) {}
        Ok(execution.finish())
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = &Arc<dyn ChannelControl>> {
        self.bindings.iter().map(|binding| &binding.control)
    }

    fn topological_order(&self) -> Result<Vec<usize>, WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::Empty);
        }
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(NodeIndex::index).collect())
            .map_err(|cycle| WorkflowError::CyclicDependency {
                node: self.graph[cycle.node_id()].clone(),
            })
    }

    fn lookup(&self, name: &str) -> Result<NodeIndex, WorkflowError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| WorkflowError::NodeNotFound(name.to_string()))
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), WorkflowError> {
        match self.phase {
            Phase::Building | Phase::Validated => Ok(()),
            Phase::Running | Phase::Stopped => Err(WorkflowError::InvalidState {
                state: self.phase.to_string(),
                action,
            }),
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("nodes", &self.nodes)
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

fn same_channel(a: &Arc<dyn ChannelControl>, b: &Arc<dyn ChannelControl>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
