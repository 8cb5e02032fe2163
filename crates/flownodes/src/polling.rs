use async_trait::async_trait;
use flowcore::{RunOutcome, Task, TaskContext, TaskError};
use std::time::Duration;

type StopCondition = Box<dyn Fn() -> bool + Send + Sync>;

/// Repeats an inner task's run phase.
///
/// Iteration ends when the stop condition holds or the node is stopped
/// (both checked before every iteration), when the inner run reports
/// `Exhausted`, or when it fails. The inner setup and cleanup run exactly
/// once around all iterations.
pub struct PollingTask<T> {
    inner: T,
    kind: String,
    stop_when: Option<StopCondition>,
    interval: Option<Duration>,
    iterations: u64,
}

impl<T: Task> PollingTask<T> {
    pub fn new(inner: T) -> Self {
        let kind = format!("polling:{}", inner.kind());
        Self {
            inner,
            kind,
            stop_when: None,
            interval: None,
            iterations: 0,
        }
    }

    pub fn stop_when<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop_when = Some(Box::new(condition));
        self
    }

    /// Wait between iterations. Without one the task only yields.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_stop(&self, ctx: &TaskContext) -> bool {
        ctx.is_stopped() || self.stop_when.as_ref().is_some_and(|condition| condition())
    }
}

#[async_trait]
impl<T: Task> Task for PollingTask<T> {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn setup(&mut self) -> Result<(), TaskError> {
        self.inner.setup().await
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        loop {
            if self.should_stop(ctx) {
                tracing::debug!(node = %ctx.node_name(), iterations = self.iterations, "polling stopped");
                return Ok(RunOutcome::Completed);
            }

            if self.inner.run(ctx).await? == RunOutcome::Exhausted {
                tracing::debug!(node = %ctx.node_name(), iterations = self.iterations, "input exhausted");
                return Ok(RunOutcome::Exhausted);
            }
            self.iterations += 1;

            match self.interval {
                Some(interval) => {
                    tokio::select! {
                        _ = ctx.stop_token().cancelled() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                None => ctx.yield_now().await,
            }
        }
    }

    async fn cleanup(&mut self) -> Result<(), TaskError> {
        self.inner.cleanup().await
    }
}
