//! Typed conduits between nodes.
//!
//! Two delivery disciplines exist as two distinct types:
//! - [`SingleItemChannel`] keeps only the latest unread value (drop-oldest).
//! - [`QueueChannel`] keeps every value in FIFO order (never drops).
//!
//! Both are closable. A read on a closed channel first drains whatever is
//! still pending and then returns `None` (end-of-stream).

mod endpoint;
mod queue;
mod single_item;

pub use endpoint::Endpoint;
pub use queue::QueueChannel;
pub use single_item::SingleItemChannel;

use crate::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Delivery discipline of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    SingleItem,
    Queue,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::SingleItem => f.write_str("single-item"),
            ChannelKind::Queue => f.write_str("queue"),
        }
    }
}

/// Type-erased view of a channel, used by whoever owns the channel's
/// lifetime rather than its data.
pub trait ChannelControl: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Close the channel. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Number of items currently readable.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed, closable conduit.
///
/// Reads return `Ok(None)` once the channel is closed and drained. A
/// `timeout` of `None` waits indefinitely.
#[async_trait]
pub trait Channel<T: Send + 'static>: ChannelControl {
    /// Hand a value to the channel. Never blocks; fails once closed.
    fn write(&self, value: T) -> Result<(), ChannelError>;

    async fn read(&self, timeout: Option<Duration>) -> Result<Option<T>, ChannelError>;

    /// Wait for at least one item, then take up to `max` without waiting
    /// further. A `max` of zero is treated as one.
    async fn read_max_chunk(
        &self,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<T>>, ChannelError>;

    /// Chunked read using the channel's configured default chunk size.
    async fn read_chunk(&self, timeout: Option<Duration>) -> Result<Option<Vec<T>>, ChannelError>;
}

/// New latest-value channel.
pub fn single_item<T: Send + 'static>() -> Arc<SingleItemChannel<T>> {
    Arc::new(SingleItemChannel::new())
}

/// New unbounded FIFO channel. `read_max_chunk` is the default chunk size used
/// by [`Channel::read_chunk`]; `None` drains everything queued.
pub fn queue<T: Send + 'static>(read_max_chunk: Option<usize>) -> Arc<QueueChannel<T>> {
    let channel = QueueChannel::new();
    Arc::new(match read_max_chunk {
        Some(max) => channel.with_read_max_chunk(max),
        None => channel,
    })
}

/// Run `wait` under an optional timeout.
pub(crate) async fn with_timeout<F, R>(timeout: Option<Duration>, wait: F) -> Result<R, ChannelError>
where
    F: std::future::Future<Output = R>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| ChannelError::Timeout(limit)),
        None => Ok(wait.await),
    }
}
