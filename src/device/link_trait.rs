//! Trait abstraction for the wireless link to enable testing

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// One characteristic on a connected device
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Start notifications; every notified value arrives on the returned
    /// receiver. Dropping the receiver unsubscribes.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>>;

    /// Read the current value
    async fn read(&self) -> Result<Bytes>;

    /// Write a value (actuator characteristics only)
    async fn write(&self, data: &[u8]) -> Result<()>;
}

/// A connected device exposing the sensor service
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Advertised device name
    fn name(&self) -> &str;

    /// Platform device identifier, if the platform exposes one
    fn id(&self) -> Option<&str>;

    /// Resolve a characteristic of the sensor service by UUID
    async fn channel(&self, uuid: &str) -> Result<Arc<dyn ChannelHandle>>;

    /// Resolves once the link is lost. May be awaited any number of times.
    async fn closed(&self);

    /// Close the link from the client side
    async fn disconnect(&self) -> Result<()>;
}
