//! In-memory GATT links for tests
//!
//! A [`SimNetwork`] is a shared bus of endpoints. Server endpoints register
//! when they advertise; client endpoints rendezvous with them by address and
//! exchange bytes over paired channels. Scan results can be scripted,
//! duplicates included, and the radio can be toggled off, which is enough to
//! exercise the full transport contract without hardware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::link::{DiscoveredDevice, GattLink, LinkHandle, LinkWriter};
use crate::protocol::DeviceIdentity;

const RENDEZVOUS_POLL: Duration = Duration::from_millis(10);
const RENDEZVOUS_ATTEMPTS: usize = 100;

// ----------------------------------------------------------------------------
// Sim Network
// ----------------------------------------------------------------------------

/// Shared in-memory bus connecting simulated endpoints
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<SimState>>,
}

struct SimState {
    powered: bool,
    scripted: Vec<DiscoveredDevice>,
    advertisers: HashMap<String, PendingServer>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            powered: true,
            scripted: Vec::new(),
            advertisers: HashMap::new(),
        }
    }
}

struct PendingServer {
    identity: DeviceIdentity,
    name: String,
    accept: oneshot::Sender<LinkHandle>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint with the given hardware address and local name
    pub fn endpoint(&self, address: impl Into<String>, name: impl Into<String>) -> SimLink {
        SimLink {
            net: self.clone(),
            address: address.into(),
            name: name.into(),
        }
    }

    /// Script a raw scan sighting. Duplicate addresses are kept verbatim so
    /// discovery deduplication can be exercised.
    pub async fn script_device(&self, address: impl Into<String>, name: Option<&str>) {
        self.inner.lock().await.scripted.push(DiscoveredDevice {
            address: address.into(),
            name: name.map(str::to_string),
        });
    }

    /// Toggle the simulated radio
    pub async fn set_powered(&self, on: bool) {
        self.inner.lock().await.powered = on;
    }
}

// ----------------------------------------------------------------------------
// Sim Link
// ----------------------------------------------------------------------------

/// One simulated endpoint on a [`SimNetwork`]
pub struct SimLink {
    net: SimNetwork,
    address: String,
    name: String,
}

#[async_trait]
impl GattLink for SimLink {
    async fn is_powered(&mut self) -> TransportResult<bool> {
        Ok(self.net.inner.lock().await.powered)
    }

    async fn set_powered(&mut self, on: bool) -> TransportResult<bool> {
        self.net.inner.lock().await.powered = on;
        Ok(true)
    }

    async fn scan(&mut self, _duration: Duration) -> TransportResult<Vec<DiscoveredDevice>> {
        let state = self.net.inner.lock().await;
        if !state.powered {
            return Err(TransportError::RadioOff);
        }
        let mut sightings = state.scripted.clone();
        for (address, server) in &state.advertisers {
            sightings.push(DiscoveredDevice {
                address: address.clone(),
                name: Some(server.name.clone()),
            });
        }
        Ok(sightings)
    }

    async fn connect(
        &mut self,
        address: &str,
        identity: Option<&DeviceIdentity>,
    ) -> TransportResult<LinkHandle> {
        // Allow a freshly spawned server a moment to register.
        for _ in 0..RENDEZVOUS_ATTEMPTS {
            let mut state = self.net.inner.lock().await;
            if !state.powered {
                return Err(TransportError::RadioOff);
            }
            if let Some(server) = state.advertisers.get(address) {
                // Identity mismatch must leave the advertisement in place.
                if let Some(id) = identity {
                    if id.service != server.identity.service {
                        return Err(TransportError::ServiceNotFound {
                            service: id.service,
                        });
                    }
                }
            }
            if let Some(server) = state.advertisers.remove(address) {
                let (client_tx, server_rx) = mpsc::unbounded_channel();
                let (server_tx, client_rx) = mpsc::unbounded_channel();

                let server_handle = LinkHandle {
                    writer: Box::new(SimWriter { tx: server_tx }),
                    notifications: server_rx,
                    peer_name: Some(self.name.clone()),
                    resolved: server.identity.clone(),
                };
                server.accept.send(server_handle).map_err(|_| {
                    TransportError::ConnectionFailed("server stopped advertising".to_string())
                })?;

                debug!("sim link established with {}", address);
                return Ok(LinkHandle {
                    writer: Box::new(SimWriter { tx: client_tx }),
                    notifications: client_rx,
                    peer_name: Some(server.name.clone()),
                    resolved: server.identity,
                });
            }
            drop(state);
            tokio::time::sleep(RENDEZVOUS_POLL).await;
        }

        Err(TransportError::DeviceNotFound {
            address: address.to_string(),
        })
    }

    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        _local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>> {
        let (accept, accepted) = oneshot::channel();
        {
            let mut state = self.net.inner.lock().await;
            state.advertisers.insert(
                self.address.clone(),
                PendingServer {
                    identity: identity.clone(),
                    name: self.name.clone(),
                    accept,
                },
            );
        }

        let handle = match timeout {
            Some(limit) => match tokio::time::timeout(limit, accepted).await {
                Ok(Ok(handle)) => Some(handle),
                // Sender dropped without a connection or the wait timed out.
                Ok(Err(_)) | Err(_) => None,
            },
            None => accepted.await.ok(),
        };

        if handle.is_none() {
            self.net.inner.lock().await.advertisers.remove(&self.address);
        }
        Ok(handle)
    }
}

// ----------------------------------------------------------------------------
// Sim Writer
// ----------------------------------------------------------------------------

struct SimWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl LinkWriter for SimWriter {
    async fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::WriteFailed("peer link closed".to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}
