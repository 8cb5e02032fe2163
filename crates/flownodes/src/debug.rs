use async_trait::async_trait;
use flowcore::{RunOutcome, Task, TaskContext, TaskError};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Simple debug sink that logs every value it reads
pub struct DebugSink<T> {
    label: String,
    seen: u64,
    _item: PhantomData<fn(T)>,
}

impl<T> DebugSink<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            seen: 0,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Debug + Send + 'static> Task for DebugSink<T> {
    fn kind(&self) -> &str {
        "debug"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        match ctx.read::<T>().await? {
            Some(value) => {
                self.seen += 1;
                tracing::info!(node = %ctx.node_name(), label = %self.label, seq = self.seen, "{:?}", value);
                Ok(RunOutcome::Completed)
            }
            None => Ok(RunOutcome::Exhausted),
        }
    }

    async fn cleanup(&mut self) -> Result<(), TaskError> {
        tracing::info!(label = %self.label, total = self.seen, "debug sink done");
        Ok(())
    }
}
