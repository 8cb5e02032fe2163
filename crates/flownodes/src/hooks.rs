use crate::PollingTask;
use async_trait::async_trait;
use flowcore::{RunOutcome, Task, TaskContext, TaskError};

type Hook = Box<dyn FnMut() -> Result<(), TaskError> + Send>;

/// Attaches extra setup and cleanup callables to a task.
///
/// Setup hooks run, in order, before the inner task's own setup. Cleanup
/// hooks run after the inner cleanup, and all of them run even if an earlier
/// one failed; the first error is returned.
pub struct WithHooks<T> {
    inner: T,
    on_setup: Vec<Hook>,
    on_cleanup: Vec<Hook>,
}

impl<T: Task> WithHooks<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            on_setup: Vec::new(),
            on_cleanup: Vec::new(),
        }
    }

    pub fn on_setup<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        self.on_setup.push(Box::new(hook));
        self
    }

    pub fn on_cleanup<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        self.on_cleanup.push(Box::new(hook));
        self
    }
}

#[async_trait]
impl<T: Task> Task for WithHooks<T> {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    async fn setup(&mut self) -> Result<(), TaskError> {
        for hook in &mut self.on_setup {
            hook()?;
        }
        self.inner.setup().await
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        self.inner.run(ctx).await
    }

    async fn cleanup(&mut self) -> Result<(), TaskError> {
        let mut result = self.inner.cleanup().await;
        for hook in &mut self.on_cleanup {
            if let Err(err) = hook() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

/// Builder methods available on every task.
pub trait TaskExt: Task + Sized {
    /// Repeat this task's run phase; see [`PollingTask`].
    fn polling(self) -> PollingTask<Self> {
        PollingTask::new(self)
    }

    fn on_setup<F>(self, hook: F) -> WithHooks<Self>
    where
        F: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        WithHooks::new(self).on_setup(hook)
    }

    fn on_cleanup<F>(self, hook: F) -> WithHooks<Self>
    where
        F: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        WithHooks::new(self).on_cleanup(hook)
    }

    fn boxed(self) -> Box<dyn Task>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<T: Task> TaskExt for T {}
