use super::{Channel, ChannelControl, ChannelKind};
use crate::ChannelError;
use std::any::Any;
use std::sync::Arc;

/// One side of a dataflow edge as seen by a node: the channel plus the name
/// of the node on the other end.
///
/// The channel is stored type-erased so a node can hold channels of different
/// item types; [`Endpoint::typed`] recovers the typed handle.
#[derive(Clone)]
pub struct Endpoint {
    peer: String,
    item_type: &'static str,
    channel: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn ChannelControl>,
}

impl Endpoint {
    pub fn new<T, C>(peer: impl Into<String>, channel: Arc<C>) -> Self
    where
        T: Send + 'static,
        C: Channel<T> + 'static,
    {
        let control: Arc<dyn ChannelControl> = channel.clone();
        let typed: Arc<dyn Channel<T>> = channel;
        Self {
            peer: peer.into(),
            item_type: std::any::type_name::<T>(),
            channel: Arc::new(typed),
            control,
        }
    }

    /// Name of the node at the other end of the edge.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn kind(&self) -> ChannelKind {
        self.control.kind()
    }

    pub fn item_type(&self) -> &'static str {
        self.item_type
    }

    pub fn control(&self) -> &Arc<dyn ChannelControl> {
        &self.control
    }

    pub fn carries<T: Send + 'static>(&self) -> bool {
        self.channel.downcast_ref::<Arc<dyn Channel<T>>>().is_some()
    }

    pub fn typed<T: Send + 'static>(&self) -> Result<&Arc<dyn Channel<T>>, ChannelError> {
        self.channel
            .downcast_ref::<Arc<dyn Channel<T>>>()
            .ok_or_else(|| ChannelError::TypeMismatch {
                peer: self.peer.clone(),
                expected: std::any::type_name::<T>(),
                actual: self.item_type,
            })
    }

    /// Whether both endpoints refer to the same channel object.
    pub fn same_channel(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.control, &other.control)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("peer", &self.peer)
            .field("kind", &self.kind())
            .field("item_type", &self.item_type)
            .field("closed", &self.control.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{queue, single_item};

    #[tokio::test]
    async fn typed_handle_round_trips() {
        let channel = single_item::<u32>();
        let endpoint = Endpoint::new("source", channel.clone());

        endpoint.typed::<u32>().unwrap().write(3).unwrap();
        assert_eq!(channel.read(None).await.unwrap(), Some(3));
        assert_eq!(endpoint.kind(), ChannelKind::SingleItem);
    }

    #[test]
    fn wrong_type_is_reported() {
        let endpoint = Endpoint::new("source", queue::<String>(None));

        assert!(!endpoint.carries::<u32>());
        match endpoint.typed::<u32>() {
            Err(ChannelError::TypeMismatch { peer, expected, .. }) => {
                assert_eq!(peer, "source");
                assert_eq!(expected, "u32");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
