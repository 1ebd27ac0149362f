//! Trait abstractions for the transport and the session extension points.
//!
//! [`Transport`] and [`Connector`] abstract over the real btleplug stack and
//! the mock transport used in tests. [`NotificationHandler`], [`SetupHook`]
//! and [`ConsumerAction`] are the three named places where callers plug
//! their own behaviour into a session.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::ChannelStreams;

/// Receives raw notifications on the transport's delivery path.
///
/// Implementations must return quickly: no I/O, no waiting, no locks beyond
/// a non-blocking queue push. Blocking here stalls further deliveries.
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification from `sender`.
    fn on_notification(&self, sender: Uuid, data: &[u8]);
}

impl<F> NotificationHandler for F
where
    F: Fn(Uuid, &[u8]) + Send + Sync,
{
    fn on_notification(&self, sender: Uuid, data: &[u8]) {
        self(sender, data)
    }
}

/// Runs once after the connection is established and before the device is
/// configured. Returning an error tears the session down.
pub trait SetupHook: Send {
    fn setup(&mut self) -> Result<()>;
}

impl<F> SetupHook for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn setup(&mut self) -> Result<()> {
        self()
    }
}

/// A [`SetupHook`] that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSetup;

impl SetupHook for NoSetup {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Invoked by the consumer loop after every drain with the accumulated
/// channel buffers.
///
/// The action may be slow (a render, a file write); the producer keeps
/// queueing while it runs. It must finish before the next drain starts.
pub trait ConsumerAction: Send {
    fn on_drain(&mut self, streams: &ChannelStreams);
}

impl<F> ConsumerAction for F
where
    F: FnMut(&ChannelStreams) + Send,
{
    fn on_drain(&mut self, streams: &ChannelStreams) {
        self(streams)
    }
}

/// GATT operations on one connected peripheral.
///
/// Implementations map their own failures onto
/// [`Error::TransportWrite`](crate::Error::TransportWrite),
/// [`Error::TransportRead`](crate::Error::TransportRead) and
/// [`Error::Subscription`](crate::Error::Subscription).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The address this transport is connected to.
    fn address(&self) -> &str;

    /// Write `data` to a characteristic and wait for the acknowledgement.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Read the current value of a characteristic.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Enable notifications on a characteristic, delivering each one to
    /// `handler` with the characteristic as sender.
    async fn start_notify(
        &self,
        characteristic: Uuid,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn stop_notify(&self, characteristic: Uuid) -> Result<()>;

    /// Release the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Establishes transports by device address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Connect to the device at `address`.
    async fn connect(&self, address: &str) -> Result<Self::Transport>;
}
