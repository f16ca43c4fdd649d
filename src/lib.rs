//! Serial-port-style framed byte transport over BLE GATT
//!
//! BLE GATT delivers discrete notification events; many protocols want a
//! plain byte stream with exact-size blocking reads and length-prefixed
//! packets, the way a serial port or TCP socket behaves. This crate bridges
//! the two: a central (client) subscribes to a peer's notify characteristic
//! and writes to its write characteristic, a peripheral (server) advertises
//! the mirror image, and both ends read and write through the same
//! [`FramedTransport`] contract.
//!
//! ## Architecture
//!
//! - [`config`] - Transport configuration and role selection
//! - [`error`] - Error types for the whole transport
//! - [`protocol`] - Service/characteristic UUIDs and packet framing
//! - [`event`] - Cross-task wake event for interrupting blocked reads
//! - [`buffer`] - Inbound byte accumulation and the blocking-read race
//! - [`link`] - The link abstraction the lifecycle drives
//! - [`connection`] - Connection lifecycle and endpoint resolution
//! - [`central`] - Client-role link over the platform Bluetooth daemon
//! - [`advertising`] - Server-role advertising with platform dispatch
//! - [`sim`] - In-memory links for tests
//! - [`transport`] - The framed transport itself
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatt_serial::{FramedTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::client("AA:BB:CC:DD:EE:FF");
//! let mut transport = FramedTransport::new(config).await?;
//! transport.open().await?;
//!
//! transport.write_packet(b"hello").await?;
//! let reply = transport.read_packet().await?;
//! println!("got {} bytes back", reply.len());
//!
//! transport.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! The client role runs wherever `btleplug` has a backend. The server role
//! (advertising a GATT service) is available on Linux via `bluer`/BlueZ;
//! other platforms fail with [`TransportError::AdvertisingUnsupported`].

pub mod advertising;
pub mod buffer;
pub mod central;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod link;
pub mod protocol;
pub mod sim;
pub mod transport;

// Public API exports
pub use buffer::{ByteStreamBuffer, ReadOutcome};
pub use central::BtleplugLink;
pub use config::TransportConfig;
pub use connection::{ConnectionLifecycle, ConnectionState};
pub use error::{TransportError, TransportResult};
pub use event::WakeEvent;
pub use link::{DiscoveredDevice, GattLink, LinkHandle, LinkWriter};
pub use protocol::{
    encode_frame, frame_length, DeviceIdentity, FRAME_HEADER_LEN, SERIAL_NOTIFY_UUID,
    SERIAL_SERVICE_UUID, SERIAL_WRITE_UUID,
};
pub use sim::{SimLink, SimNetwork};
pub use transport::{FramedTransport, ReadChunk};
