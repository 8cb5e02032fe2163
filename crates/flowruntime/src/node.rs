use flowcore::{
    ChannelControl, Endpoint, EventEmitter, NodeError, SchedulingMode, StopToken, Task,
    TaskContext, TaskError, TaskState,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// How long a timed-out main-thread node gets to run cleanup after its run
/// phase is abandoned.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Scheduling wrapper that owns exactly one task.
///
/// A node is created detached and handed to a [`Workflow`](crate::Workflow),
/// which wires its channels and is the only thing that starts and stops it.
pub struct Node {
    name: String,
    mode: SchedulingMode,
    kind: String,
    task: Option<Box<dyn Task>>,
    read_timeout: Option<Duration>,
    inputs: Vec<Endpoint>,
    outputs: Vec<Endpoint>,
    stop: StopToken,
    status: Arc<Mutex<NodeStatus>>,
    done: Option<oneshot::Receiver<()>>,
    abort: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

/// Everything a node needs from the execution that starts it.
pub(crate) struct NodeLink {
    pub index: usize,
    pub emitter: EventEmitter,
    pub signals: mpsc::UnboundedSender<Termination>,
    pub default_read_timeout: Option<Duration>,
}

/// Sent once per started node when its thread of control ends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Termination {
    pub index: usize,
    pub failed: bool,
}

#[derive(Debug)]
pub(crate) struct NodeStatus {
    pub state: TaskState,
    pub error: Option<NodeError>,
    pub cleanup_error: Option<NodeError>,
    pub duration: Option<Duration>,
}

impl NodeStatus {
    /// Record the final outcome unless one was already recorded (a join
    /// timeout decides the state before the detached worker finishes).
    fn finish(&mut self, outcome: Result<(), NodeError>, elapsed: Duration) {
        if self.state.is_terminal() {
            return;
        }
        self.duration = Some(elapsed);
        match outcome {
            Ok(()) => self.state = TaskState::Stopped,
            Err(err) => {
                self.state = TaskState::Failed;
                self.error = Some(err);
            }
        }
    }

    fn fail(&mut self, err: NodeError) {
        self.state = TaskState::Failed;
        self.error = Some(err);
    }
}

fn lock(status: &Mutex<NodeStatus>) -> MutexGuard<'_, NodeStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    /// New node running on its own worker thread.
    pub fn new(name: impl Into<String>, task: impl Task + 'static) -> Self {
        Self::with_mode(name, task, SchedulingMode::Parallel)
    }

    /// New node driven cooperatively by the workflow's controlling thread.
    pub fn main_thread(name: impl Into<String>, task: impl Task + 'static) -> Self {
        Self::with_mode(name, task, SchedulingMode::MainThread)
    }

    pub fn with_mode(name: impl Into<String>, task: impl Task + 'static, mode: SchedulingMode) -> Self {
        let kind = task.kind().to_string();
        Self {
            name: name.into(),
            mode,
            kind,
            task: Some(Box::new(task)),
            read_timeout: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stop: StopToken::new(),
            status: Arc::new(Mutex::new(NodeStatus {
                state: TaskState::Created,
                error: None,
                cleanup_error: None,
                duration: None,
            })),
            done: None,
            abort: None,
            worker: None,
        }
    }

    /// Timeout for every blocking read the task makes. Overrides the
    /// workflow default.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Kind reported by the owned task.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn state(&self) -> TaskState {
        lock(&self.status).state
    }

    pub fn error(&self) -> Option<NodeError> {
        lock(&self.status).error.clone()
    }

    pub fn cleanup_error(&self) -> Option<NodeError> {
        lock(&self.status).cleanup_error.clone()
    }

    pub fn duration(&self) -> Option<Duration> {
        lock(&self.status).duration
    }

    /// Names of the nodes feeding this one.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|endpoint| endpoint.peer())
    }

    /// Names of the nodes this one feeds.
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|endpoint| endpoint.peer())
    }

    pub(crate) fn attach_input(&mut self, endpoint: Endpoint) {
        self.inputs.push(endpoint);
    }

    pub(crate) fn attach_output(&mut self, endpoint: Endpoint) {
        self.outputs.push(endpoint);
    }

    pub(crate) fn set_stop_token(&mut self, stop: StopToken) {
        self.stop = stop;
    }

    /// Run setup, then begin the run phase on the node's thread of control.
    ///
    /// Resolves once setup has finished so that downstream nodes start only
    /// after this one is live. Main-thread nodes must be started from inside
    /// the execution's `LocalSet`.
    pub(crate) async fn start(&mut self, link: NodeLink) -> Result<(), NodeError> {
        let task = self.task.take().ok_or_else(|| NodeError::InvalidState {
            node: self.name.clone(),
            state: self.state().to_string(),
            action: "start",
        })?;

        let ctx = TaskContext::new(self.name.clone(), self.stop.clone())
            .with_endpoints(self.inputs.clone(), self.outputs.clone())
            .with_read_timeout(self.read_timeout.or(link.default_read_timeout))
            .cooperative(self.mode == SchedulingMode::MainThread);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = oneshot::channel();
        self.done = Some(done_rx);
        self.abort = Some(abort_tx);

        let worker = Worker {
            name: self.name.clone(),
            mode: self.mode,
            task,
            ctx,
            emitter: link.emitter,
            status: self.status.clone(),
            ready: Some(ready_tx),
            abort: abort_rx,
            completion: Completion {
                index: link.index,
                name: self.name.clone(),
                status: self.status.clone(),
                outputs: self.outputs.iter().map(|e| e.control().clone()).collect(),
                signals: link.signals,
                done: Some(done_tx),
            },
        };

        tracing::debug!(node = %self.name, mode = %self.mode, "starting node");

        match self.mode {
            SchedulingMode::Parallel => {
                let spawned = std::thread::Builder::new()
                    .name(format!("flow-node-{}", self.name))
                    .spawn(move || worker.run_on_own_runtime());
                match spawned {
                    Ok(handle) => self.worker = Some(handle),
                    Err(err) => {
                        let err = NodeError::Spawn {
                            node: self.name.clone(),
                            message: err.to_string(),
                        };
                        tracing::error!(node = %self.name, error = %err, "failed to spawn worker thread");
                        lock(&self.status).fail(err.clone());
                        return Err(err);
                    }
                }
            }
            SchedulingMode::MainThread => {
                tokio::task::spawn_local(worker.run());
            }
        }

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Panicked {
                node: self.name.clone(),
            }),
        }
    }

    /// Ask the task to wind down. Cooperative: the task notices at its next
    /// read or stop check, and cleanup runs once its run phase returns.
    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the node's thread of control to finish, cleanup included.
    ///
    /// On timeout the node is marked failed. A parallel worker is left
    /// detached and runs cleanup once the task returns. A main-thread task
    /// only makes progress while the execution drives it, so its run phase is
    /// abandoned instead and cleanup is given [`ABORT_GRACE`] to finish.
    pub(crate) async fn join(&mut self, timeout: Duration) -> Result<(), NodeError> {
        let Some(done) = self.done.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut *done).await {
            Ok(_) => {
                self.done = None;
                self.abort = None;
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        tracing::debug!(node = %self.name, "worker thread unwound");
                    }
                }
                Ok(())
            }
            Err(_) => {
                let err = NodeError::Timeout {
                    node: self.name.clone(),
                    waited: timeout,
                };
                tracing::warn!(node = %self.name, ?timeout, "node did not stop in time; detaching");
                lock(&self.status).fail(err.clone());
                self.worker = None;

                if self.mode == SchedulingMode::MainThread {
                    if let Some(abort) = self.abort.take() {
                        let _ = abort.send(());
                    }
                    if tokio::time::timeout(ABORT_GRACE, &mut *done).await.is_err() {
                        tracing::warn!(node = %self.name, "cleanup did not finish after abort");
                    }
                }
                self.abort = None;
                self.done = None;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// The moving half of a started node: task, context and reporting handles.
struct Worker {
    name: String,
    mode: SchedulingMode,
    task: Box<dyn Task>,
    ctx: TaskContext,
    emitter: EventEmitter,
    status: Arc<Mutex<NodeStatus>>,
    ready: Option<oneshot::Sender<Result<(), NodeError>>>,
    abort: oneshot::Receiver<()>,
    completion: Completion,
}

impl Worker {
    fn run_on_own_runtime(self) {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(err) => {
                let err = NodeError::Spawn {
                    node: self.name.clone(),
                    message: err.to_string(),
                };
                tracing::error!(node = %self.name, error = %err, "failed to build worker runtime");
                lock(&self.status).fail(err.clone());
                self.ctx.close_outputs();
                if let Some(ready) = self.ready {
                    let _ = ready.send(Err(err));
                }
            }
        }
    }

    async fn run(mut self) {
        let started = Instant::now();

        if let Err(source) = self.task.setup().await {
            let err = NodeError::Setup {
                node: self.name.clone(),
                source,
            };
            tracing::error!(node = %self.name, error = %err, "setup failed");
            self.emitter.failed(&err);
            self.ctx.close_outputs();
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(err.clone()));
            }
            self.cleanup().await;
            lock(&self.status).finish(Err(err), started.elapsed());
            return;
        }

        lock(&self.status).state = TaskState::Initialized;
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }

        lock(&self.status).state = TaskState::Running;
        self.emitter.started(self.mode);
        tracing::debug!(node = %self.name, "running");

        // A dropped abort sender disables the second branch.
        let run = AssertUnwindSafe(self.task.run(&self.ctx)).catch_unwind();
        let outcome = tokio::select! {
            outcome = run => Some(outcome),
            Ok(()) = &mut self.abort => None,
        };
        self.ctx.close_outputs();

        let outcome = match outcome {
            Some(Ok(Ok(run))) => {
                tracing::debug!(node = %self.name, outcome = ?run, "run finished");
                self.emitter
                    .completed(started.elapsed().as_millis() as u64);
                Ok(())
            }
            Some(Ok(Err(TaskError::Cancelled))) => {
                tracing::debug!(node = %self.name, "run cancelled");
                Ok(())
            }
            Some(Ok(Err(source))) => {
                let err = NodeError::Runtime {
                    node: self.name.clone(),
                    source,
                };
                tracing::error!(node = %self.name, error = %err, "run failed");
                self.emitter.failed(&err);
                Err(err)
            }
            Some(Err(_)) => {
                let err = NodeError::Panicked {
                    node: self.name.clone(),
                };
                tracing::error!(node = %self.name, "task panicked");
                self.emitter.failed(&err);
                Err(err)
            }
            None => {
                // The join deadline already recorded the failure.
                tracing::debug!(node = %self.name, "run abandoned");
                Ok(())
            }
        };

        self.cleanup().await;
        lock(&self.status).finish(outcome, started.elapsed());
    }

    async fn cleanup(&mut self) {
        if let Err(source) = self.task.cleanup().await {
            let err = NodeError::Cleanup {
                node: self.name.clone(),
                source,
            };
            tracing::warn!(node = %self.name, error = %err, "cleanup failed");
            self.emitter.warn(err.to_string());
            lock(&self.status).cleanup_error = Some(err);
        }
    }
}

/// Reports termination when the worker goes away, however it goes away.
///
/// A worker that unwinds or is dropped before recording an outcome is marked
/// as panicked; its outbound channels are closed either way so downstream
/// readers reach end-of-stream.
struct Completion {
    index: usize,
    name: String,
    status: Arc<Mutex<NodeStatus>>,
    outputs: Vec<Arc<dyn ChannelControl>>,
    signals: mpsc::UnboundedSender<Termination>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        for output in &self.outputs {
            output.close();
        }

        let failed = {
            let mut status = lock(&self.status);
            if !status.state.is_terminal() {
                tracing::error!(node = %self.name, "task panicked");
                status.fail(NodeError::Panicked {
                    node: self.name.clone(),
                });
            }
            status.state == TaskState::Failed
        };

        let _ = self.signals.send(Termination {
            index: self.index,
            failed,
        });
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}
