//! btleplug-backed GATT link
//!
//! Client-role scanning, address resolution, endpoint resolution, and
//! notification subscription over the platform Bluetooth daemon. Server-role
//! advertising is dispatched to the platform advertiser. Radio power control
//! goes through BlueZ on Linux; other platforms report powered and cannot
//! toggle.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::advertising::{BleAdvertiser, PlatformAdvertiser};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::link::{DiscoveredDevice, GattLink, LinkHandle, LinkWriter};
use crate::protocol::DeviceIdentity;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Btleplug Link
// ----------------------------------------------------------------------------

/// [`GattLink`] implementation over btleplug (central) and the platform
/// advertiser (peripheral)
pub struct BtleplugLink {
    config: TransportConfig,
    adapter: Adapter,
    advertiser: PlatformAdvertiser,
    #[cfg(target_os = "linux")]
    bluer_adapter: Option<bluer::Adapter>,
}

impl BtleplugLink {
    /// Acquire the first available adapter. Fails with `AdapterUnavailable`
    /// when no usable radio is present.
    pub async fn new(config: TransportConfig) -> TransportResult<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_| TransportError::AdapterUnavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|_| TransportError::AdapterUnavailable)?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterUnavailable)?;
        info!("BLE adapter initialized");

        Ok(Self {
            config,
            adapter,
            advertiser: PlatformAdvertiser::new(),
            #[cfg(target_os = "linux")]
            bluer_adapter: None,
        })
    }

    #[cfg(target_os = "linux")]
    async fn bluer_adapter(&mut self) -> TransportResult<&bluer::Adapter> {
        if self.bluer_adapter.is_none() {
            let session = bluer::Session::new()
                .await
                .map_err(|_| TransportError::AdapterUnavailable)?;
            let adapter = session
                .default_adapter()
                .await
                .map_err(|_| TransportError::AdapterUnavailable)?;
            self.bluer_adapter = Some(adapter);
        }
        self.bluer_adapter
            .as_ref()
            .ok_or(TransportError::AdapterUnavailable)
    }

    async fn known_peripheral(&self, target: BDAddr) -> TransportResult<Option<Peripheral>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
        Ok(peripherals.into_iter().find(|p| p.address() == target))
    }

    /// Resolve the device by address, re-discovering when it is not already
    /// known to the daemon. `discovery_timeout` of `None` searches without
    /// bound.
    async fn find_peripheral(&self, target: BDAddr) -> TransportResult<Peripheral> {
        if let Some(peripheral) = self.known_peripheral(target).await? {
            return Ok(peripheral);
        }

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;

        let deadline = self.config.discovery_timeout.map(|t| Instant::now() + t);
        let found = loop {
            if let Some(peripheral) = self.known_peripheral(target).await? {
                break Some(peripheral);
            }
            if matches!(deadline, Some(d) if Instant::now() >= d) {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("failed to stop scan: {}", e);
        }

        found.ok_or_else(|| TransportError::DeviceNotFound {
            address: target.to_string(),
        })
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn is_powered(&mut self) -> TransportResult<bool> {
        #[cfg(target_os = "linux")]
        {
            let adapter = self.bluer_adapter().await?;
            adapter
                .is_powered()
                .await
                .map_err(|e| TransportError::ScanFailed(e.to_string()))
        }
        #[cfg(not(target_os = "linux"))]
        {
            // btleplug exposes no power state; assume on.
            Ok(true)
        }
    }

    async fn set_powered(&mut self, on: bool) -> TransportResult<bool> {
        #[cfg(target_os = "linux")]
        {
            let adapter = self.bluer_adapter().await?;
            adapter
                .set_powered(on)
                .await
                .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
            Ok(true)
        }
        #[cfg(not(target_os = "linux"))]
        {
            warn!("radio power control is not supported on this platform (requested {})", on);
            Ok(false)
        }
    }

    async fn scan(&mut self, duration: Duration) -> TransportResult<Vec<DiscoveredDevice>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
        debug!("scanning for {:?}", duration);

        let deadline = Instant::now() + duration;
        let mut sightings = Vec::new();
        loop {
            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
            for peripheral in peripherals {
                let name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    _ => None,
                };
                sightings.push(DiscoveredDevice {
                    address: peripheral.address().to_string(),
                    name,
                });
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("failed to stop scan: {}", e);
        }
        Ok(sightings)
    }

    async fn connect(
        &mut self,
        address: &str,
        identity: Option<&DeviceIdentity>,
    ) -> TransportResult<LinkHandle> {
        let target: BDAddr = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress {
                address: address.to_string(),
            })?;

        let peripheral = self.find_peripheral(target).await?;

        match timeout(self.config.connection_timeout, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(TransportError::ConnectionFailed(
                    "connection timed out".to_string(),
                ))
            }
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (service, write_char, notify_char) = resolve_endpoints(&peripheral, identity)?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let notify_uuid = notify_char.uuid;
        tokio::spawn(async move {
            while let Some(event) = notifications.next().await {
                if event.uuid == notify_uuid && tx.send(event.value).is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        });

        let peer_name = match peripheral.properties().await {
            Ok(Some(props)) => props.local_name,
            _ => None,
        };

        Ok(LinkHandle {
            writer: Box::new(PeripheralWriter {
                peripheral,
                characteristic: write_char.clone(),
            }),
            notifications: rx,
            peer_name,
            resolved: DeviceIdentity::new(service, Some(write_char.uuid), Some(notify_uuid)),
        })
    }

    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>> {
        self.advertiser
            .advertise(identity, local_name, timeout)
            .await
    }
}

// ----------------------------------------------------------------------------
// Endpoint Resolution
// ----------------------------------------------------------------------------

/// Resolve the service and the write/notify characteristics on a connected
/// peripheral. With a configured identity the UUIDs must match; otherwise the
/// first service carrying both a writable and a notifiable characteristic is
/// used.
fn resolve_endpoints(
    peripheral: &Peripheral,
    identity: Option<&DeviceIdentity>,
) -> TransportResult<(uuid::Uuid, Characteristic, Characteristic)> {
    let writable = |c: &Characteristic| {
        c.properties.contains(CharPropFlags::WRITE)
            || c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
    };
    let notifiable = |c: &Characteristic| {
        c.properties.contains(CharPropFlags::NOTIFY)
            || c.properties.contains(CharPropFlags::INDICATE)
    };

    let services = peripheral.services();
    for service in &services {
        if let Some(id) = identity {
            if service.uuid != id.service {
                continue;
            }
        }

        let write_char = match identity.and_then(|id| id.write) {
            Some(uuid) => service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .ok_or(TransportError::CharacteristicNotFound {
                    characteristic: uuid,
                })?,
            None => match service.characteristics.iter().find(|c| writable(c)) {
                Some(c) => c,
                None if identity.is_some() => {
                    return Err(TransportError::CharacteristicNotFound {
                        characteristic: service.uuid,
                    })
                }
                None => continue,
            },
        };

        let notify_char = match identity.and_then(|id| id.notify) {
            Some(uuid) => service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .ok_or(TransportError::CharacteristicNotFound {
                    characteristic: uuid,
                })?,
            None => match service.characteristics.iter().find(|c| notifiable(c)) {
                Some(c) => c,
                None if identity.is_some() => {
                    return Err(TransportError::CharacteristicNotFound {
                        characteristic: service.uuid,
                    })
                }
                None => continue,
            },
        };

        return Ok((service.uuid, write_char.clone(), notify_char.clone()));
    }

    Err(TransportError::ServiceNotFound {
        service: identity.map(|id| id.service).unwrap_or_else(uuid::Uuid::nil),
    })
}

// ----------------------------------------------------------------------------
// Peripheral Writer
// ----------------------------------------------------------------------------

struct PeripheralWriter {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl LinkWriter for PeripheralWriter {
    async fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}
