//! Adapters that turn plain functions into tasks.
//!
//! Each adapter performs a single step per `run`: wrap it with
//! [`TaskExt::polling`](crate::TaskExt::polling) to repeat it until the input
//! is exhausted or a stop condition holds.

use async_trait::async_trait;
use flowcore::{RunOutcome, Task, TaskContext, TaskError};
use futures::future::BoxFuture;

type Step<I, O> = Box<dyn FnMut(I) -> Result<O, TaskError> + Send>;

/// `() -> T`: writes one value to every outbound channel per run.
pub struct Producer<T> {
    produce: Step<(), T>,
}

impl<T: Clone + Send + 'static> Producer<T> {
    pub fn new<F>(mut produce: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::try_new(move || Ok(produce()))
    }

    pub fn try_new<F>(mut produce: F) -> Self
    where
        F: FnMut() -> Result<T, TaskError> + Send + 'static,
    {
        Self {
            produce: Box::new(move |()| produce()),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Task for Producer<T> {
    fn kind(&self) -> &str {
        "producer"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        let value = (self.produce)(())?;
        ctx.write(value).await?;
        Ok(RunOutcome::Completed)
    }
}

/// `(T) -> U`: one read and one write per run.
pub struct Transformer<T, U> {
    transform: Step<T, U>,
}

impl<T, U> Transformer<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    pub fn new<F>(mut transform: F) -> Self
    where
        F: FnMut(T) -> U + Send + 'static,
    {
        Self::try_new(move |value| Ok(transform(value)))
    }

    pub fn try_new<F>(transform: F) -> Self
    where
        F: FnMut(T) -> Result<U, TaskError> + Send + 'static,
    {
        Self {
            transform: Box::new(transform),
        }
    }
}

#[async_trait]
impl<T, U> Task for Transformer<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    fn kind(&self) -> &str {
        "transformer"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        let Some(value) = ctx.read::<T>().await? else {
            return Ok(RunOutcome::Exhausted);
        };
        let output = (self.transform)(value)?;
        ctx.write(output).await?;
        Ok(RunOutcome::Completed)
    }
}

/// `(T) -> ()`: one read per run, nothing written.
pub struct Consumer<T> {
    consume: Step<T, ()>,
}

impl<T: Send + 'static> Consumer<T> {
    pub fn new<F>(mut consume: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::try_new(move |value| {
            consume(value);
            Ok(())
        })
    }

    pub fn try_new<F>(consume: F) -> Self
    where
        F: FnMut(T) -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            consume: Box::new(consume),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Task for Consumer<T> {
    fn kind(&self) -> &str {
        "consumer"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        match ctx.read::<T>().await? {
            Some(value) => {
                (self.consume)(value)?;
                Ok(RunOutcome::Completed)
            }
            None => Ok(RunOutcome::Exhausted),
        }
    }
}

/// `(Vec<T>) -> ()`: one chunked read per run, sized by the inbound
/// channel's default chunk size.
pub struct BatchConsumer<T> {
    consume: Step<Vec<T>, ()>,
}

impl<T: Send + 'static> BatchConsumer<T> {
    pub fn new<F>(mut consume: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        Self::try_new(move |batch| {
            consume(batch);
            Ok(())
        })
    }

    pub fn try_new<F>(consume: F) -> Self
    where
        F: FnMut(Vec<T>) -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            consume: Box::new(consume),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Task for BatchConsumer<T> {
    fn kind(&self) -> &str {
        "batch-consumer"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        match ctx.read_chunk::<T>().await? {
            Some(batch) => {
                (self.consume)(batch)?;
                Ok(RunOutcome::Completed)
            }
            None => Ok(RunOutcome::Exhausted),
        }
    }
}

type ContextFn =
    Box<dyn for<'a> FnMut(&'a TaskContext) -> BoxFuture<'a, Result<RunOutcome, TaskError>> + Send>;

/// Runs an async closure with full access to the context, for tasks that
/// need their own read/write logic.
///
/// ```ignore
/// let task = ContextTask::new(|ctx| {
///     Box::pin(async move {
///         let left: Option<u32> = ctx.read_from("left").await?;
///         let right: Option<u32> = ctx.read_from("right").await?;
///         match left.zip(right) {
///             Some((l, r)) => ctx.write(l + r).await?,
///             None => return Ok(RunOutcome::Exhausted),
///         }
///         Ok(RunOutcome::Completed)
///     })
/// });
/// ```
pub struct ContextTask {
    body: ContextFn,
}

impl ContextTask {
    pub fn new<F>(body: F) -> Self
    where
        F: for<'a> FnMut(&'a TaskContext) -> BoxFuture<'a, Result<RunOutcome, TaskError>>
            + Send
            + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }
}

#[async_trait]
impl Task for ContextTask {
    fn kind(&self) -> &str {
        "context"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        (self.body)(ctx).await
    }
}
