//! Connection lifecycle: discovery, advertise, connect, disconnect

use std::collections::HashSet;
use std::time::Duration;

use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::link::{DiscoveredDevice, GattLink, LinkHandle, LinkWriter};
use crate::protocol::DeviceIdentity;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// State of the logical link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Advertising,
    Connecting,
    Connected,
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

/// Establishes and tears down the logical link and resolves the GATT
/// endpoint identifiers. Owns the [`ConnectionState`]; the transport reads
/// it to gate I/O.
pub struct ConnectionLifecycle {
    link: Box<dyn GattLink>,
    config: TransportConfig,
    state: ConnectionState,
    writer: Option<Box<dyn LinkWriter>>,
    peer_name: Option<String>,
    resolved: Option<DeviceIdentity>,
}

impl ConnectionLifecycle {
    pub fn new(link: Box<dyn GattLink>, config: TransportConfig) -> Self {
        Self {
            link,
            config,
            state: ConnectionState::Disconnected,
            writer: None,
            peer_name: None,
            resolved: None,
        }
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_advertising(&self) -> bool {
        self.state == ConnectionState::Advertising
    }

    /// Name of the connected peer, if any
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// The endpoint UUIDs resolved for the current or last connection
    pub fn resolved_identity(&self) -> Option<&DeviceIdentity> {
        self.resolved.as_ref()
    }

    /// Whether the radio is powered on
    pub async fn is_powered(&mut self) -> TransportResult<bool> {
        self.link.is_powered().await
    }

    /// Power the radio on or off
    pub async fn set_powered(&mut self, on: bool) -> TransportResult<bool> {
        self.link.set_powered(on).await
    }

    /// Scan for nearby devices, deduplicated by address.
    ///
    /// The first sighting of an address wins; later sightings (possibly
    /// carrying a different name) are dropped. Fails with `RadioOff` when
    /// the radio is powered down.
    pub async fn discover(
        &mut self,
        duration: Option<Duration>,
    ) -> TransportResult<SmallVec<[DiscoveredDevice; 4]>> {
        if !self.link.is_powered().await? {
            return Err(TransportError::RadioOff);
        }

        let was_disconnected = self.state == ConnectionState::Disconnected;
        if was_disconnected {
            self.state = ConnectionState::Discovering;
        }

        let duration = duration.unwrap_or(self.config.scan_duration);
        let result = self.link.scan(duration).await;

        if was_disconnected {
            self.state = ConnectionState::Disconnected;
        }

        let sightings = result?;
        let mut seen = HashSet::new();
        let mut devices = SmallVec::new();
        for device in sightings {
            if seen.insert(device.address.clone()) {
                devices.push(device);
            }
        }
        debug!("discovery found {} unique devices", devices.len());
        Ok(devices)
    }

    /// Client role: connect to the device at `address` and resolve the GATT
    /// endpoints. Returns the inbound notification stream on success.
    /// Re-entering from `Connected` forces a disconnect first.
    pub async fn connect(
        &mut self,
        address: &str,
    ) -> TransportResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        if self.state == ConnectionState::Connected {
            self.disconnect().await;
        }
        if !self.link.is_powered().await? {
            return Err(TransportError::RadioOff);
        }

        self.state = ConnectionState::Connecting;
        let identity = self.config.identity.clone();
        match self.link.connect(address, identity.as_ref()).await {
            Ok(handle) => {
                info!(
                    "connected to {} (service {})",
                    address, handle.resolved.service
                );
                Ok(self.attach(handle))
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Server role: advertise and wait for an inbound connection. Returns
    /// the notification stream, or `None` on timeout. Re-entering from
    /// `Connected` forces a disconnect first.
    pub async fn advertise(
        &mut self,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<mpsc::UnboundedReceiver<Vec<u8>>>> {
        if self.state == ConnectionState::Connected {
            self.disconnect().await;
        }

        self.state = ConnectionState::Advertising;
        let identity = self.config.identity.clone().unwrap_or_default();
        let local_name = self.config.local_name.clone();
        match self.link.advertise(&identity, &local_name, timeout).await {
            Ok(Some(handle)) => {
                info!("inbound connection on service {}", handle.resolved.service);
                Ok(Some(self.attach(handle)))
            }
            Ok(None) => {
                debug!("advertise timed out without an inbound connection");
                self.state = ConnectionState::Disconnected;
                Ok(None)
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn attach(&mut self, handle: LinkHandle) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.writer = Some(handle.writer);
        self.peer_name = handle.peer_name;
        self.resolved = Some(handle.resolved);
        self.state = ConnectionState::Connected;
        handle.notifications
    }

    /// Hand a payload to the resolved write endpoint
    pub async fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write(data).await
    }

    /// Release the link. Idempotent; daemon teardown failures are logged
    /// and swallowed.
    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                warn!("link teardown failed: {}", e);
            }
        }
        self.peer_name = None;
        self.state = ConnectionState::Disconnected;
    }
}
