use crate::channel::{Channel, ChannelControl, Endpoint};
use crate::error::Direction;
use crate::{ChannelError, StopToken, TaskError};
use std::sync::Arc;
use std::time::Duration;

/// Handle a task uses to reach the channels wired to its node.
///
/// Reads block until data arrives, the channel closes, the read timeout
/// elapses, or the node is asked to stop. Both end-of-stream and a stop
/// request surface as `Ok(None)`, so a task written as "read until `None`"
/// terminates cleanly in either case.
pub struct TaskContext {
    node: String,
    inputs: Vec<Endpoint>,
    outputs: Vec<Endpoint>,
    stop: StopToken,
    read_timeout: Option<Duration>,
    cooperative: bool,
}

impl TaskContext {
    pub fn new(node: impl Into<String>, stop: StopToken) -> Self {
        Self {
            node: node.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stop,
            read_timeout: None,
            cooperative: false,
        }
    }

    pub fn with_input<T, C>(mut self, source: impl Into<String>, channel: Arc<C>) -> Self
    where
        T: Send + 'static,
        C: Channel<T> + 'static,
    {
        self.inputs.push(Endpoint::new(source, channel));
        self
    }

    pub fn with_output<T, C>(mut self, destination: impl Into<String>, channel: Arc<C>) -> Self
    where
        T: Send + 'static,
        C: Channel<T> + 'static,
    {
        self.outputs.push(Endpoint::new(destination, channel));
        self
    }

    pub fn with_endpoints(mut self, inputs: Vec<Endpoint>, outputs: Vec<Endpoint>) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Mark the context as belonging to a main-thread node: every write
    /// then yields to the other cooperatively scheduled nodes.
    pub fn cooperative(mut self, cooperative: bool) -> Self {
        self.cooperative = cooperative;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn inputs(&self) -> &[Endpoint] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Endpoint] {
        &self.outputs
    }

    /// Read one value from the node's only inbound channel.
    pub async fn read<T: Send + 'static>(&self) -> Result<Option<T>, TaskError> {
        let endpoint = self.sole(Direction::Inbound)?;
        self.read_endpoint(endpoint).await
    }

    /// Read one value from the channel fed by `source`.
    pub async fn read_from<T: Send + 'static>(&self, source: &str) -> Result<Option<T>, TaskError> {
        let endpoint = self.named(Direction::Inbound, source)?;
        self.read_endpoint(endpoint).await
    }

    /// Read up to `max` values from the node's only inbound channel.
    pub async fn read_max_chunk<T: Send + 'static>(
        &self,
        max: usize,
    ) -> Result<Option<Vec<T>>, TaskError> {
        let channel = self.sole(Direction::Inbound)?.typed::<T>()?;
        self.until_stopped(channel.read_max_chunk(max, self.read_timeout))
            .await
    }

    pub async fn read_max_chunk_from<T: Send + 'static>(
        &self,
        source: &str,
        max: usize,
    ) -> Result<Option<Vec<T>>, TaskError> {
        let channel = self.named(Direction::Inbound, source)?.typed::<T>()?;
        self.until_stopped(channel.read_max_chunk(max, self.read_timeout))
            .await
    }

    /// Chunked read using the inbound channel's default chunk size.
    pub async fn read_chunk<T: Send + 'static>(&self) -> Result<Option<Vec<T>>, TaskError> {
        let channel = self.sole(Direction::Inbound)?.typed::<T>()?;
        self.until_stopped(channel.read_chunk(self.read_timeout))
            .await
    }

    /// Write `value` to every outbound channel carrying `T`.
    ///
    /// A node with no outbound channels discards the value. Channels are
    /// matched on the exact item type at runtime, so an unsuffixed integer
    /// literal is written as `i32`: spell out `1_u8` when the channel
    /// carries `u8`.
    ///
    /// If any matching channel is already closed the write fails before
    /// anything is delivered. A channel closed concurrently with the write
    /// may still leave earlier outputs holding the value.
    pub async fn write<T: Clone + Send + 'static>(&self, value: T) -> Result<(), TaskError> {
        self.fan_out(value)?;
        self.after_write().await;
        Ok(())
    }

    /// Write `value` to the channel feeding `destination`.
    pub async fn write_to<T: Send + 'static>(
        &self,
        destination: &str,
        value: T,
    ) -> Result<(), TaskError> {
        self.named(Direction::Outbound, destination)?
            .typed::<T>()?
            .write(value)?;
        self.after_write().await;
        Ok(())
    }

    /// Give other cooperatively scheduled nodes a chance to run.
    pub async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }

    /// Close every outbound channel so downstream readers see end-of-stream
    /// once they drain what is pending.
    pub fn close_outputs(&self) {
        for endpoint in &self.outputs {
            endpoint.control().close();
        }
    }

    fn fan_out<T: Clone + Send + 'static>(&self, value: T) -> Result<(), TaskError> {
        if self.outputs.is_empty() {
            tracing::trace!(node = %self.node, "no outbound channels; value discarded");
            return Ok(());
        }

        let targets: Vec<&Arc<dyn Channel<T>>> = self
            .outputs
            .iter()
            .filter_map(|endpoint| endpoint.typed::<T>().ok())
            .collect();
        let Some((last, rest)) = targets.split_last() else {
            // Surface the mismatch against the first output.
            self.outputs[0].typed::<T>()?;
            return Ok(());
        };
        if targets.iter().any(|channel| channel.is_closed()) {
            return Err(ChannelError::Closed.into());
        }

        for channel in rest {
            channel.write(value.clone())?;
        }
        last.write(value)?;
        Ok(())
    }

    async fn after_write(&self) {
        if self.cooperative {
            tokio::task::yield_now().await;
        }
    }

    async fn read_endpoint<T: Send + 'static>(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<T>, TaskError> {
        let channel = endpoint.typed::<T>()?;
        self.until_stopped(channel.read(self.read_timeout)).await
    }

    async fn until_stopped<F, R>(&self, read: F) -> Result<Option<R>, TaskError>
    where
        F: std::future::Future<Output = Result<Option<R>, ChannelError>>,
    {
        tokio::select! {
            biased;
            result = read => Ok(result?),
            _ = self.stop.cancelled() => {
                tracing::debug!(node = %self.node, "read interrupted by stop request");
                Ok(None)
            }
        }
    }

    fn endpoints(&self, direction: Direction) -> &[Endpoint] {
        match direction {
            Direction::Inbound => &self.inputs,
            Direction::Outbound => &self.outputs,
        }
    }

    fn sole(&self, direction: Direction) -> Result<&Endpoint, ChannelError> {
        match self.endpoints(direction) {
            [endpoint] => Ok(endpoint),
            [] => Err(ChannelError::NotConnected {
                node: self.node.clone(),
                direction,
            }),
            many => Err(ChannelError::Ambiguous {
                node: self.node.clone(),
                direction,
                count: many.len(),
            }),
        }
    }

    fn named(&self, direction: Direction, peer: &str) -> Result<&Endpoint, ChannelError> {
        self.endpoints(direction)
            .iter()
            .find(|endpoint| endpoint.peer() == peer)
            .ok_or_else(|| ChannelError::UnknownPeer {
                node: self.node.clone(),
                peer: peer.to_string(),
            })
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("node", &self.node)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("stopped", &self.is_stopped())
            .field("read_timeout", &self.read_timeout)
            .field("cooperative", &self.cooperative)
            .finish()
    }
}
