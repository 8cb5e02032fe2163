use super::{with_timeout, Channel, ChannelControl, ChannelKind};
use crate::ChannelError;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Capacity-one channel with latest-value-wins semantics.
///
/// A write replaces any unread value; there is no backpressure and no
/// delivery guarantee for values that get overwritten before a read.
pub struct SingleItemChannel<T> {
    state: Mutex<Slot<T>>,
    notify: Notify,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
    overwritten: u64,
}

impl<T: Send + 'static> SingleItemChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Slot {
                value: None,
                closed: false,
                overwritten: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Take the pending value without waiting.
    pub fn try_read(&self) -> Option<T> {
        self.slot().value.take()
    }

    /// How many unread values were replaced by a later write.
    pub fn overwritten(&self) -> u64 {
        self.slot().overwritten
    }

    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_take(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a write between the check and the
            // await still wakes us.
            notified.as_mut().enable();
            {
                let mut slot = self.slot();
                if let Some(value) = slot.value.take() {
                    return Some(value);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

impl<T: Send + 'static> Default for SingleItemChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SingleItemChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SingleItemChannel")
            .field("pending", &slot.value.is_some())
            .field("closed", &slot.closed)
            .finish()
    }
}

impl<T: Send + 'static> ChannelControl for SingleItemChannel<T> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::SingleItem
    }

    fn close(&self) {
        self.slot().closed = true;
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.slot().closed
    }

    fn len(&self) -> usize {
        usize::from(self.slot().value.is_some())
    }
}

#[async_trait]
impl<T: Send + 'static> Channel<T> for SingleItemChannel<T> {
    fn write(&self, value: T) -> Result<(), ChannelError> {
        {
            let mut slot = self.slot();
            if slot.closed {
                return Err(ChannelError::Closed);
            }
            if slot.value.replace(value).is_some() {
                slot.overwritten += 1;
                tracing::trace!("single-item channel dropped an unread value");
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn read(&self, timeout: Option<Duration>) -> Result<Option<T>, ChannelError> {
        with_timeout(timeout, self.wait_take()).await
    }

    async fn read_max_chunk(
        &self,
        _max: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<T>>, ChannelError> {
        Ok(self.read(timeout).await?.map(|value| vec![value]))
    }

    async fn read_chunk(&self, timeout: Option<Duration>) -> Result<Option<Vec<T>>, ChannelError> {
        self.read_max_chunk(1, timeout).await
    }
}
