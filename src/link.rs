//! The boundary to the platform Bluetooth daemon
//!
//! Everything below this trait (GATT object registration, property-change
//! signal plumbing, adapter management) belongs to the platform collaborator
//! and is consumed only through this narrow surface. [`crate::central`]
//! implements it over btleplug/BlueZ; [`crate::sim`] implements it in memory
//! for tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::protocol::DeviceIdentity;

// ----------------------------------------------------------------------------
// Discovered Device
// ----------------------------------------------------------------------------

/// A device observed during a scan; transient, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredDevice {
    /// Hardware address, colon-separated hex pairs
    pub address: String,
    /// Advertised local name, when present
    pub name: Option<String>,
}

// ----------------------------------------------------------------------------
// Link Handle
// ----------------------------------------------------------------------------

/// An established GATT link: a write endpoint plus the inbound notification
/// stream, with the endpoint identifiers that were resolved for it
pub struct LinkHandle {
    /// Sink for outbound payloads (single call per write, no chunking)
    pub writer: Box<dyn LinkWriter>,
    /// Opaque byte chunks delivered by the peer's notify characteristic
    pub notifications: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Name of the connected peer, when known
    pub peer_name: Option<String>,
    /// The service/characteristic UUIDs actually in use
    pub resolved: DeviceIdentity,
}

/// Write endpoint of an established link
#[async_trait]
pub trait LinkWriter: Send {
    /// Hand a payload to the write characteristic in a single operation
    async fn write(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Release the underlying link (best effort)
    async fn close(&mut self) -> TransportResult<()>;
}

// ----------------------------------------------------------------------------
// Gatt Link
// ----------------------------------------------------------------------------

/// The daemon-facing contract consumed by [`crate::connection::ConnectionLifecycle`]
#[async_trait]
pub trait GattLink: Send {
    /// Whether the radio is powered on
    async fn is_powered(&mut self) -> TransportResult<bool>;

    /// Power the radio on or off; returns whether the change took effect
    async fn set_powered(&mut self, on: bool) -> TransportResult<bool>;

    /// Scan for the given duration, yielding every sighting. Duplicates are
    /// allowed here; deduplication is the lifecycle's concern.
    async fn scan(&mut self, duration: Duration) -> TransportResult<Vec<DiscoveredDevice>>;

    /// Client role: resolve the device by address and the GATT endpoints by
    /// identity (or by characteristic properties when identity is partial),
    /// subscribe to notifications, and return the established link
    async fn connect(
        &mut self,
        address: &str,
        identity: Option<&DeviceIdentity>,
    ) -> TransportResult<LinkHandle>;

    /// Server role: advertise the identity and block until a client attaches
    /// or the timeout elapses (`None` = unbounded). `Ok(None)` means timeout.
    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>>;
}
