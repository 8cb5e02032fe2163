use super::{with_timeout, Channel, ChannelControl, ChannelKind};
use crate::ChannelError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Unbounded FIFO channel. Nothing written is ever dropped.
///
/// Chunked reads let a slow aggregator keep up with a fast producer: once at
/// least one item is queued, `read_max_chunk(n)` takes up to `n` of them in a
/// single call.
pub struct QueueChannel<T> {
    state: Mutex<Buffer<T>>,
    notify: Notify,
    read_max_chunk: Option<usize>,
}

struct Buffer<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T: Send + 'static> QueueChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Buffer {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            read_max_chunk: None,
        }
    }

    /// Default chunk size for [`Channel::read_chunk`].
    pub fn with_read_max_chunk(mut self, max: usize) -> Self {
        self.read_max_chunk = Some(max.max(1));
        self
    }

    pub fn read_max_chunk_size(&self) -> Option<usize> {
        self.read_max_chunk
    }

    /// Take the oldest item without waiting.
    pub fn try_read(&self) -> Option<T> {
        self.buffer().items.pop_front()
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_drain(&self, max: usize) -> Option<Vec<T>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut buffer = self.buffer();
                if !buffer.items.is_empty() {
                    let take = max.min(buffer.items.len());
                    return Some(buffer.items.drain(..take).collect());
                }
                if buffer.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

impl<T: Send + 'static> Default for QueueChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for QueueChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("QueueChannel")
            .field("queued", &buffer.items.len())
            .field("closed", &buffer.closed)
            .field("read_max_chunk", &self.read_max_chunk)
            .finish()
    }
}

impl<T: Send + 'static> ChannelControl for QueueChannel<T> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Queue
    }

    fn close(&self) {
        self.buffer().closed = true;
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.buffer().closed
    }

    fn len(&self) -> usize {
        self.buffer().items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> Channel<T> for QueueChannel<T> {
    fn write(&self, value: T) -> Result<(), ChannelError> {
        {
            let mut buffer = self.buffer();
            if buffer.closed {
                return Err(ChannelError::Closed);
            }
            buffer.items.push_back(value);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn read(&self, timeout: Option<Duration>) -> Result<Option<T>, ChannelError> {
        let chunk = with_timeout(timeout, self.wait_drain(1)).await?;
        Ok(chunk.and_then(|mut items| items.pop()))
    }

    async fn read_max_chunk(
        &self,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<T>>, ChannelError> {
        with_timeout(timeout, self.wait_drain(max.max(1))).await
    }

    async fn read_chunk(&self, timeout: Option<Duration>) -> Result<Option<Vec<T>>, ChannelError> {
        let max = self.read_max_chunk.unwrap_or(usize::MAX);
        self.read_max_chunk(max, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn keeps_fifo_order() {
        let channel = QueueChannel::new();
        for i in 0..5 {
            channel.write(i).unwrap();
        }

        for i in 0..5 {
            assert_eq!(channel.read(None).await.unwrap(), Some(i));
        }
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn chunk_returns_what_is_available() {
        let channel = QueueChannel::new();
        channel.write(1).unwrap();
        channel.write(2).unwrap();

        assert_eq!(channel.read_max_chunk(10, None).await.unwrap(), Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn default_chunk_size_applies() {
        let channel = QueueChannel::new().with_read_max_chunk(2);
        for i in 0..5 {
            channel.write(i).unwrap();
        }

        assert_eq!(channel.read_chunk(None).await.unwrap(), Some(vec![0, 1]));
        assert_eq!(channel.read_chunk(None).await.unwrap(), Some(vec![2, 3]));
        assert_eq!(channel.read_chunk(None).await.unwrap(), Some(vec![4]));
    }

    #[tokio::test]
    async fn unconfigured_chunk_drains_everything() {
        let channel = QueueChannel::new();
        for i in 0..100 {
            channel.write(i).unwrap();
        }

        let chunk = channel.read_chunk(None).await.unwrap().unwrap();
        assert_eq!(chunk.len(), 100);
    }

    #[tokio::test]
    async fn zero_chunk_reads_one() {
        let channel = QueueChannel::new();
        channel.write('x').unwrap();
        channel.write('y').unwrap();

        assert_eq!(channel.read_max_chunk(0, None).await.unwrap(), Some(vec!['x']));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let channel = QueueChannel::new();
        channel.write("a").unwrap();
        channel.write("b").unwrap();
        channel.close();

        assert_eq!(channel.read(None).await.unwrap(), Some("a"));
        assert_eq!(channel.read(None).await.unwrap(), Some("b"));
        assert_eq!(channel.read(None).await.unwrap(), None);
        assert_eq!(channel.read_max_chunk(3, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_on_another_task_wakes_chunk_reader() {
        let channel: Arc<QueueChannel<u32>> = Arc::new(QueueChannel::new());
        let reader = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.read_max_chunk(8, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.write(7).unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), Some(vec![7]));
    }

    #[tokio::test]
    async fn timeout_on_empty_queue() {
        let channel: QueueChannel<u8> = QueueChannel::new();
        let err = channel
            .read_max_chunk(4, Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }
}
