use crate::node::{NodeLink, Termination};
use crate::report::{ExecutionReport, NodeReport};
use crate::workflow::{Phase, Workflow};
use chrono::{DateTime, Utc};
use flowcore::{ErrorHandling, ExecutionEvent, ExecutionId, WorkflowError};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

/// A started workflow run, driven by the controlling thread.
///
/// Main-thread nodes only make progress while [`Execution::step`] is running;
/// parallel nodes run on their own threads regardless. Dropping an unfinished
/// execution shuts it down.
pub struct Execution<'w> {
    workflow: &'w mut Workflow,
    // Dropped before the runtime so detached local tasks go first.
    local: LocalSet,
    runtime: Runtime,
    signals: mpsc::UnboundedReceiver<Termination>,
    started: Vec<usize>,
    terminated: HashSet<usize>,
    failed: usize,
    stopped_by_signal: bool,
    shut_down: bool,
    execution_id: ExecutionId,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl<'w> Execution<'w> {
    /// Start every node in `order`, each after its predecessors are live.
    pub(crate) fn launch(workflow: &'w mut Workflow, order: Vec<usize>) -> Result<Self, WorkflowError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = LocalSet::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let execution_id = ExecutionId::new_v4();

        workflow.phase = Phase::Running;
        workflow.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow: workflow.name().to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(workflow = %workflow.name(), %execution_id, nodes = order.len(), "starting workflow");

        let mut execution = Self {
            workflow,
            local,
            runtime,
            signals: rx,
            started: Vec::with_capacity(order.len()),
            terminated: HashSet::new(),
            failed: 0,
            stopped_by_signal: false,
            shut_down: false,
            execution_id,
            started_at: Utc::now(),
            clock: Instant::now(),
        };

        let fail_fast = execution.fail_fast();
        let default_read_timeout = execution.workflow.settings().default_read_timeout();
        let Execution {
            workflow,
            runtime,
            local,
            started,
            ..
        } = &mut execution;

        local.block_on(runtime, async {
            for idx in order {
                if workflow.stop.is_cancelled() {
                    tracing::info!(workflow = %workflow.name(), "stop requested during startup");
                    break;
                }

                let link = NodeLink {
                    index: idx,
                    emitter: workflow
                        .events
                        .create_emitter(execution_id, workflow.nodes[idx].name()),
                    signals: tx.clone(),
                    default_read_timeout,
                };
                started.push(idx);

                if let Err(err) = workflow.nodes[idx].start(link).await {
                    tracing::error!(node = %workflow.nodes[idx].name(), error = %err, "node failed to start");
                    if fail_fast {
                        break;
                    }
                }
            }
        });

        execution.drain_signals();
        Ok(execution)
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Whether the execution is still live.
    pub fn is_running(&self) -> bool {
        !self.shut_down
    }

    /// Drive main-thread nodes for at most `budget`, then process node
    /// terminations. Returns `false` once the execution has shut down.
    ///
    /// Returns early when a node terminates or a stop is requested, so an
    /// external event loop can call this with a short budget on every frame.
    pub fn step(&mut self, budget: Duration) -> bool {
        if self.shut_down {
            return false;
        }

        let stop = self.workflow.stop.clone();
        let Execution {
            runtime,
            local,
            signals,
            ..
        } = self;

        let first = local.block_on(runtime, async {
            tokio::task::yield_now().await;
            tokio::select! {
                signal = signals.recv() => signal,
                _ = stop.cancelled() => None,
                _ = tokio::time::sleep(budget) => None,
            }
        });

        if let Some(signal) = first {
            self.record(signal);
        }
        self.drain_signals();

        if let Some(reason) = self.finished_because() {
            tracing::info!(workflow = %self.workflow.name(), reason, "shutting down");
            self.shutdown();
            return false;
        }
        true
    }

    /// Shut down if still running and produce the execution report.
    pub fn finish(mut self) -> ExecutionReport {
        self.shutdown();

        let finished_at = Utc::now();
        let nodes = self
            .workflow
            .nodes
            .iter()
            .map(NodeReport::from_node)
            .collect();

        ExecutionReport {
            execution_id: self.execution_id,
            workflow: self.workflow.name().to_string(),
            started_at: self.started_at,
            finished_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
            stopped_by_signal: self.stopped_by_signal,
            nodes,
        }
    }

    fn fail_fast(&self) -> bool {
        self.workflow.settings().on_error == ErrorHandling::StopWorkflow
    }

    fn finished_because(&mut self) -> Option<&'static str> {
        if self.workflow.stop.is_cancelled() {
            self.stopped_by_signal = true;
            return Some("stop requested");
        }
        if self.failed > 0 && self.fail_fast() {
            return Some("node failed");
        }
        if self.started.iter().all(|idx| self.terminated.contains(idx)) {
            return Some("all nodes finished");
        }
        None
    }

    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.record(signal);
        }
    }

    fn record(&mut self, signal: Termination) {
        if self.terminated.insert(signal.index) && signal.failed {
            self.failed += 1;
        }
        tracing::debug!(
            node = %self.workflow.nodes[signal.index].name(),
            failed = signal.failed,
            "node terminated"
        );
    }

    /// Stop nodes in reverse start order, join them under one shared
    /// deadline, then close every channel.
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let deadline = Instant::now() + self.workflow.settings().join_timeout();
        let Execution {
            workflow,
            runtime,
            local,
            started,
            ..
        } = self;

        for &idx in started.iter().rev() {
            workflow.nodes[idx].stop();
        }

        local.block_on(runtime, async {
            for &idx in started.iter().rev() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if let Err(err) = workflow.nodes[idx].join(remaining).await {
                    tracing::warn!(error = %err, "join failed");
                }
            }
        });

        for channel in workflow.channels() {
            channel.close();
        }
        workflow.phase = Phase::Stopped;
        self.drain_signals();

        let success = self
            .workflow
            .nodes
            .iter()
            .all(|node| node.error().is_none());
        let duration_ms = self.clock.elapsed().as_millis() as u64;
        self.workflow.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: self.execution_id,
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(workflow = %self.workflow.name(), success, duration_ms, "workflow stopped");
    }
}

impl Drop for Execution<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Execution<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("execution_id", &self.execution_id)
            .field("workflow", &self.workflow.name())
            .field("started", &self.started.len())
            .field("terminated", &self.terminated.len())
            .field("failed", &self.failed)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
