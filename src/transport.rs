//! The framed serial transport
//!
//! Composes the connection lifecycle, the byte stream buffer, and the wake
//! event into the public contract: a blocking, serial-port-like byte stream
//! with length-prefixed packet framing, layered over the message-oriented
//! GATT link. Inbound notification chunks are pumped into the buffer by a
//! background task; the caller's task drains it through `receive`, `read`,
//! `recvall`, and `read_packet`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::{ByteStreamBuffer, ReadOutcome};
use crate::central::BtleplugLink;
use crate::config::TransportConfig;
use crate::connection::{ConnectionLifecycle, ConnectionState};
use crate::error::{TransportError, TransportResult};
use crate::event::WakeEvent;
use crate::link::{DiscoveredDevice, GattLink};
use crate::protocol::{encode_frame, frame_length, DeviceIdentity, FRAME_HEADER_LEN};

use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Read Chunk
// ----------------------------------------------------------------------------

/// Result of one blocking read: the drained bytes plus why the wait ended.
///
/// On [`ReadOutcome::Filled`] the data is at least as long as requested (the
/// whole buffer is drained, not just the requested prefix). On the other two
/// outcomes the data holds whatever was buffered, possibly nothing; the
/// caller should treat that as "try again", not as data loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub data: Vec<u8>,
    pub outcome: ReadOutcome,
}

// ----------------------------------------------------------------------------
// Framed Transport
// ----------------------------------------------------------------------------

/// Serial-style framed byte transport over a BLE GATT link
pub struct FramedTransport {
    config: TransportConfig,
    lifecycle: ConnectionLifecycle,
    buffer: Arc<ByteStreamBuffer>,
    wake: WakeEvent,
    read_timeout: Option<Duration>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
}

impl FramedTransport {
    /// Create a transport over the platform Bluetooth daemon. Fails with
    /// `AdapterUnavailable` when no usable radio is present.
    pub async fn new(config: TransportConfig) -> TransportResult<Self> {
        let link = BtleplugLink::new(config.clone()).await?;
        Ok(Self::with_link(config, Box::new(link)))
    }

    /// Create a transport over an explicit link backend (tests, simulation)
    pub fn with_link(config: TransportConfig, link: Box<dyn GattLink>) -> Self {
        let lifecycle = ConnectionLifecycle::new(link, config.clone());
        Self {
            config,
            lifecycle,
            buffer: Arc::new(ByteStreamBuffer::new()),
            wake: WakeEvent::new(),
            read_timeout: None,
            pump: None,
            closed: false,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Establish the link according to the configured role: servers
    /// advertise (bounded by `discovery_timeout`), clients connect to the
    /// configured address. Returns `true` once `Connected`, `false` when a
    /// server's wait timed out.
    pub async fn open(&mut self) -> TransportResult<bool> {
        if self.config.is_server {
            self.advertise(self.config.discovery_timeout).await
        } else {
            let address = self
                .config
                .address
                .clone()
                .ok_or(TransportError::NoAddressConfigured)?;
            self.connect(&address).await?;
            Ok(true)
        }
    }

    /// Scan for nearby devices, deduplicated by address (first sighting wins)
    pub async fn discover(
        &mut self,
        duration: Option<Duration>,
    ) -> TransportResult<SmallVec<[DiscoveredDevice; 4]>> {
        self.lifecycle.discover(duration).await
    }

    /// Client role: connect to the device at `address`
    pub async fn connect(&mut self, address: &str) -> TransportResult<()> {
        let notifications = self.lifecycle.connect(address).await?;
        self.attach(notifications).await;
        Ok(())
    }

    /// Server role: advertise and wait for an inbound connection. Returns
    /// `false` on timeout (`None` = unbounded wait).
    pub async fn advertise(&mut self, timeout: Option<Duration>) -> TransportResult<bool> {
        match self.lifecycle.advertise(timeout).await? {
            Some(notifications) => {
                self.attach(notifications).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attach(&mut self, mut notifications: mpsc::UnboundedReceiver<Vec<u8>>) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // Bytes left over from a previous link would corrupt framing.
        self.buffer.drain_all().await;
        self.closed = false;

        let buffer = Arc::clone(&self.buffer);
        self.pump = Some(tokio::spawn(async move {
            while let Some(chunk) = notifications.recv().await {
                buffer.append(&chunk).await;
            }
            debug!("notification pump ended");
        }));
    }

    /// Release the link; idempotent
    pub async fn disconnect(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.lifecycle.disconnect().await;
    }

    /// Close the transport. Subsequent reads and writes fail with
    /// `NotConnected`; a new `connect`/`advertise`/`open` re-opens it.
    pub async fn close(&mut self) {
        self.disconnect().await;
        self.closed = true;
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed || !self.lifecycle.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Non-blocking: remove and return everything currently buffered
    pub async fn receive(&mut self) -> TransportResult<Vec<u8>> {
        self.ensure_open()?;
        Ok(self.buffer.drain_all().await)
    }

    /// Blocking read: wait until at least `size` bytes are buffered, the
    /// wake event is signaled, or the read timeout elapses, then drain the
    /// whole buffer. `size` must be greater than zero.
    pub async fn read(&mut self, size: usize) -> TransportResult<ReadChunk> {
        if size == 0 {
            return Err(TransportError::InvalidReadSize);
        }
        self.ensure_open()?;
        let (data, outcome) = self
            .buffer
            .wait_for_at_least(size, self.read_timeout, &self.wake)
            .await;
        Ok(ReadChunk { data, outcome })
    }

    /// Read exactly `size` bytes, looping over `read` until the total is
    /// reached. An interruption that makes no progress surfaces as
    /// `TimedOut`/`Cancelled` carrying the byte counts; everything already
    /// drained (partial bytes and any surplus past `size`) is requeued at
    /// the front of the buffer, so a retry observes an intact stream.
    pub async fn recvall(&mut self, size: usize) -> TransportResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut out: Vec<u8> = Vec::with_capacity(size);
        while out.len() < size {
            let chunk = self.read(size - out.len()).await?;
            let progressed = !chunk.data.is_empty();
            out.extend_from_slice(&chunk.data);
            if out.len() >= size {
                break;
            }
            match chunk.outcome {
                ReadOutcome::Filled => {}
                ReadOutcome::TimedOut if !progressed => {
                    let received = out.len();
                    self.buffer.requeue(out).await;
                    return Err(TransportError::TimedOut {
                        received,
                        requested: size,
                    });
                }
                ReadOutcome::Cancelled if !progressed => {
                    let received = out.len();
                    self.buffer.requeue(out).await;
                    return Err(TransportError::Cancelled {
                        received,
                        requested: size,
                    });
                }
                // Partial progress on an interruption: keep accumulating.
                _ => {}
            }
        }

        if out.len() > size {
            let surplus = out.split_off(size);
            self.buffer.requeue(surplus).await;
        }
        Ok(out)
    }

    /// Read one frame: a 4-byte little-endian length header followed by that
    /// many payload bytes. Returns the payload only; a zero length is a
    /// legal empty frame.
    pub async fn read_packet(&mut self) -> TransportResult<Vec<u8>> {
        let header = self.recvall(FRAME_HEADER_LEN).await?;
        let mut bytes = [0u8; FRAME_HEADER_LEN];
        bytes.copy_from_slice(&header);
        let length = frame_length(&bytes);

        if length > self.config.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                length,
                limit: self.config.max_frame_size,
            });
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        self.recvall(length).await
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Hand `data` to the resolved write endpoint in a single operation.
    /// Returns `true` on acknowledged submission, `false` on a link-level
    /// failure. Fails with `NotConnected` outside the connected state. Data
    /// is not chunked to any transport MTU here.
    pub async fn write(&mut self, data: &[u8]) -> TransportResult<bool> {
        self.ensure_open()?;
        match self.lifecycle.write(data).await {
            Ok(()) => Ok(true),
            Err(TransportError::NotConnected) => Err(TransportError::NotConnected),
            Err(e) => {
                warn!("write failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Write one frame: the 4-byte little-endian length header followed by
    /// the payload
    pub async fn write_packet(&mut self, payload: &[u8]) -> TransportResult<bool> {
        if payload.len() > self.config.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                length: payload.len(),
                limit: self.config.max_frame_size,
            });
        }
        self.write(&encode_frame(payload)).await
    }

    // ------------------------------------------------------------------
    // Timeouts and Wake Signaling
    // ------------------------------------------------------------------

    /// Set the deadline applied to subsequent blocking reads
    /// (`None` = unbounded)
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// The deadline applied to blocking reads
    pub fn timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// A shareable handle to the wake event; signaling it from another task
    /// or thread interrupts a blocked read
    pub fn get_event(&self) -> WakeEvent {
        self.wake.clone()
    }

    /// Install an externally supplied wake event (shared with another
    /// execution context)
    pub fn set_event(&mut self, event: WakeEvent) {
        self.wake = event;
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Whether the logical link is connected
    pub fn connected(&self) -> bool {
        !self.closed && self.lifecycle.is_connected()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Number of bytes waiting in the receive buffer
    pub async fn in_waiting(&self) -> usize {
        self.buffer.len().await
    }

    /// Name of the connected peer, when known
    pub fn name(&self) -> Option<&str> {
        self.lifecycle.peer_name()
    }

    /// The endpoint UUIDs resolved for the current connection
    pub fn resolved_identity(&self) -> Option<&DeviceIdentity> {
        self.lifecycle.resolved_identity()
    }

    /// Whether the server role is currently advertising
    pub fn is_advertising(&self) -> bool {
        self.lifecycle.is_advertising()
    }

    /// Whether the radio is powered on
    pub async fn is_powered(&mut self) -> TransportResult<bool> {
        self.lifecycle.is_powered().await
    }

    /// Power the radio on or off; returns whether the change took effect
    pub async fn set_powered(&mut self, on: bool) -> TransportResult<bool> {
        self.lifecycle.set_powered(on).await
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
