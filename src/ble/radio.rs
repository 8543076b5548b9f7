//! Radio stack boundary.
//!
//! The controller never talks to a BLE library directly. It issues
//! commands through [`Radio`] and consumes one ordered stream of
//! [`RadioEvent`]s. The stream is an unbounded channel so nothing the
//! radio reports is lost while a `connect` is being awaited.

use async_trait::async_trait;
use futures::channel::mpsc;
use std::fmt;
use uuid::Uuid;

use crate::config::ScanParams;
use crate::error::Result;

/// Opaque identifier of a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Wrap a radio-specific identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// The identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of one link. A radio never hands out the same value twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discovered service on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    /// The link the service lives on.
    pub connection: ConnectionHandle,
    /// Service UUID.
    pub uuid: Uuid,
}

/// A discovered characteristic on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// The link the characteristic lives on.
    pub connection: ConnectionHandle,
    /// Owning service UUID.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// Result of a subscribe request that reached the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Notifications will be delivered.
    Subscribed,
    /// The characteristic has no notify property.
    NotifyUnsupported,
}

/// One advertisement report.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Who sent it.
    pub address: PeripheralAddress,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Whether the advertisement lists `service`.
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

/// Asynchronous output of the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// An advertisement was received while scanning.
    Advertisement(Advertisement),
    /// A bounded scan pass ran out of time.
    ScanComplete,
    /// A subscribed characteristic notified.
    Notification {
        /// Source characteristic.
        characteristic: CharacteristicHandle,
        /// Raw payload.
        data: Vec<u8>,
    },
    /// A link went down.
    Disconnected {
        /// The link that went down.
        connection: ConnectionHandle,
    },
}

/// Sending half of the radio event stream.
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// Receiving half of the radio event stream.
pub type RadioEvents = mpsc::UnboundedReceiver<RadioEvent>;

/// Create a connected event sender/stream pair.
pub fn event_channel() -> (RadioEventSender, RadioEvents) {
    mpsc::unbounded()
}

/// Commands the controller issues to the radio stack.
///
/// Every call may suspend; `connect` in particular blocks until the link is
/// up or the stack gives up, which some stacks never do. Callers bound it
/// with their own timeout. "Not found" outcomes are `Ok(None)`, so `Err`
/// always means the radio itself failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Radio: Send + Sync {
    /// Begin scanning. A bounded pass ends with [`RadioEvent::ScanComplete`].
    async fn start_scan(&self, params: ScanParams) -> Result<()>;

    /// Stop scanning. Stopping an idle scanner is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a link to `address`.
    async fn connect(&self, address: PeripheralAddress) -> Result<ConnectionHandle>;

    /// Ask for a larger MTU. Returns the MTU in effect.
    async fn request_mtu(&self, connection: ConnectionHandle, mtu: u16) -> Result<u16>;

    /// Look up a primary service on the peer.
    async fn discover_service(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
    ) -> Result<Option<ServiceHandle>>;

    /// Look up a characteristic inside a discovered service.
    async fn discover_characteristic(
        &self,
        service: ServiceHandle,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: CharacteristicHandle) -> Result<SubscribeOutcome>;

    /// Drop a link. Disconnecting an unknown handle is not an error.
    async fn disconnect(&self, connection: ConnectionHandle) -> Result<()>;
}
