use async_trait::async_trait;
use flowcore::{RunOutcome, Task, TaskContext, TaskError};
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// Writes every item of a lazy, possibly infinite sequence downstream.
///
/// A single `run` drains the sequence. It returns `Exhausted` when the
/// sequence ends and `Completed` when the node is stopped between items.
///
/// Items travel as `T`, so the item type must match the channel exactly: an
/// unsuffixed range such as `1..=5` yields `i32`. Write `1..=5_u32` when the
/// channel carries `u32`.
pub struct StreamingProducer<T> {
    items: BoxStream<'static, Result<T, TaskError>>,
    written: u64,
}

impl<T: Clone + Send + 'static> StreamingProducer<T> {
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items))
    }

    pub fn from_stream<S>(items: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::try_from_stream(items.map(Ok))
    }

    /// Stream whose items may fail; the first error ends the run.
    pub fn try_from_stream<S>(items: S) -> Self
    where
        S: Stream<Item = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            items: items.boxed(),
            written: 0,
        }
    }

    /// Items written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Task for StreamingProducer<T> {
    fn kind(&self) -> &str {
        "streaming-producer"
    }

    async fn run(&mut self, ctx: &TaskContext) -> Result<RunOutcome, TaskError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.stop_token().cancelled() => {
                    tracing::debug!(node = %ctx.node_name(), written = self.written, "stopped between items");
                    return Ok(RunOutcome::Completed);
                }
                next = self.items.next() => next,
            };

            match next {
                Some(item) => {
                    ctx.write(item?).await?;
                    self.written += 1;
                }
                None => {
                    tracing::debug!(node = %ctx.node_name(), written = self.written, "sequence exhausted");
                    return Ok(RunOutcome::Exhausted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::channel::{queue, ChannelControl};
    use flowcore::StopToken;

    #[tokio::test]
    async fn finite_sequence_is_exhausted() {
        let out = queue::<u32>(None);
        let ctx = TaskContext::new("gen", StopToken::new()).with_output("sink", out.clone());

        let mut task = StreamingProducer::from_iter(1..=5_u32);
        assert_eq!(task.run(&ctx).await.unwrap(), RunOutcome::Exhausted);
        assert_eq!(task.written(), 5);
        assert_eq!(out.len(), 5);
    }

    #[tokio::test]
    async fn stop_ends_infinite_sequence() {
        let stop = StopToken::new();
        let out = queue::<u64>(None);
        let ctx = TaskContext::new("gen", stop.clone())
            .with_output("sink", out.clone())
            .cooperative(true);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            stop.cancel();
        });

        let mut task = StreamingProducer::from_iter(0_u64..);
        assert_eq!(task.run(&ctx).await.unwrap(), RunOutcome::Completed);
        canceller.await.unwrap();
        assert!(task.written() > 0);
    }

    #[tokio::test]
    async fn failing_item_ends_the_run() {
        let ctx = TaskContext::new("gen", StopToken::new()).with_output("sink", queue::<u8>(None));
        let items = stream::iter(vec![Ok(1_u8), Err(TaskError::failed("bad item")), Ok(3)]);

        let mut task = StreamingProducer::try_from_stream(items);
        assert!(task.run(&ctx).await.is_err());
        assert_eq!(task.written(), 1);
    }
}
