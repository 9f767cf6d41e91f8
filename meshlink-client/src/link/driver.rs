//! The serial BLE driver port. The real implementation wraps the
//! platform's central stack (service discovery, characteristic writes,
//! notification subscription); tests substitute a scripted fake.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::LinkError;

/// Why the peripheral connection went away.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    /// The radio closed the connection.
    PeerClosed,
    /// Radio went out of range or the link timed out.
    LinkLost,
    Other(String),
}

#[derive(Debug)]
pub enum DriverEvent {
    /// One complete inbound frame. The radio writes each logical frame as
    /// a single notification, so no reassembly happens at this layer.
    Notification(Vec<u8>),
    /// The connection dropped. `reconnecting` is true when the system
    /// stack is already re-establishing it on its own.
    Disconnected { reconnecting: bool, cause: DisconnectCause },
    /// A system auto-reconnect finished service rediscovery; the link must
    /// re-subscribe before traffic can resume.
    Reconnected,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Connects to the peripheral and performs service and characteristic
    /// discovery.
    async fn connect(&self, device_id: Uuid) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Enables RX notifications. Called once after [`connect`](Driver::connect)
    /// and again after every [`DriverEvent::Reconnected`].
    async fn subscribe(&self) -> Result<(), LinkError>;

    /// Writes one MTU-sized chunk with response-mode acknowledgement.
    async fn write(&self, chunk: &[u8]) -> Result<(), LinkError>;

    /// Negotiated maximum write size for this peripheral.
    fn mtu(&self) -> usize;

    /// Hands over the inbound event stream. Yields `None` on every call
    /// after the first.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DriverEvent>>;
}
