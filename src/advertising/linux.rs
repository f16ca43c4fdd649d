//! Linux advertising implementation using bluer (BlueZ)
//!
//! Registers a GATT application with one service carrying a write
//! characteristic (inbound bytes) and a notify characteristic (outbound
//! bytes), advertises the service UUID, and treats the moment a client
//! enables notifications as the inbound-connection rendezvous.

use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::link::{LinkHandle, LinkWriter};
use crate::protocol::DeviceIdentity;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct LinuxAdvertiser {
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
}

impl LinuxAdvertiser {
    pub fn new() -> Self {
        Self {
            session: None,
            adapter: None,
        }
    }

    async fn initialize(&mut self) -> TransportResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let session = bluer::Session::new()
            .await
            .map_err(|_| TransportError::AdapterUnavailable)?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| TransportError::AdapterUnavailable)?;

        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await.map_err(|e| {
                TransportError::AdvertisingFailed(format!("failed to power on adapter: {}", e))
            })?;
        }

        self.session = Some(session);
        self.adapter = Some(adapter);
        info!("BlueZ adapter initialized for advertising");
        Ok(())
    }
}

impl Default for LinuxAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for LinuxAdvertiser {
    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>> {
        use bluer::gatt::local::{
            Application, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
            CharacteristicWrite, CharacteristicWriteMethod, Service,
        };

        self.initialize().await?;
        let adapter = self.adapter.as_ref().ok_or(TransportError::AdapterUnavailable)?;

        let write_uuid = identity.write_or_default();
        let notify_uuid = identity.notify_or_default();

        // Inbound bytes: every client write lands on this channel.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        // Rendezvous: the notify callback fires once a client subscribes.
        let (notifier_tx, mut notifier_rx) = mpsc::channel(1);

        let app = Application {
            services: vec![Service {
                uuid: identity.service,
                primary: true,
                characteristics: vec![
                    Characteristic {
                        uuid: write_uuid,
                        write: Some(CharacteristicWrite {
                            write: true,
                            write_without_response: true,
                            method: CharacteristicWriteMethod::Fun(Box::new(
                                move |new_value, _req| {
                                    let inbound_tx = inbound_tx.clone();
                                    async move {
                                        debug!("inbound write of {} bytes", new_value.len());
                                        let _ = inbound_tx.send(new_value);
                                        Ok(())
                                    }
                                    .boxed()
                                },
                            )),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Characteristic {
                        uuid: notify_uuid,
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                                let notifier_tx = notifier_tx.clone();
                                async move {
                                    debug!("client enabled notifications");
                                    let _ = notifier_tx.send(notifier).await;
                                }
                                .boxed()
                            })),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let app_handle = adapter.serve_gatt_application(app).await.map_err(|e| {
            TransportError::AdvertisingFailed(format!("failed to register GATT service: {}", e))
        })?;

        let advertisement = bluer::adv::Advertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            service_uuids: std::iter::once(identity.service).collect(),
            local_name: Some(local_name.to_string()),
            discoverable: Some(true),
            ..Default::default()
        };

        let adv_handle = adapter.advertise(advertisement).await.map_err(|e| {
            TransportError::AdvertisingFailed(format!("failed to start advertising: {}", e))
        })?;
        info!("advertising as '{}' on service {}", local_name, identity.service);

        let notifier = match timeout {
            Some(limit) => match tokio::time::timeout(limit, notifier_rx.recv()).await {
                Ok(Some(notifier)) => notifier,
                Ok(None) => {
                    return Err(TransportError::AdvertisingFailed(
                        "notification rendezvous closed".to_string(),
                    ));
                }
                Err(_) => {
                    // Timed out waiting for a client; dropping the handles
                    // unregisters the advertisement and the GATT application.
                    return Ok(None);
                }
            },
            None => notifier_rx.recv().await.ok_or_else(|| {
                TransportError::AdvertisingFailed("notification rendezvous closed".to_string())
            })?,
        };

        Ok(Some(LinkHandle {
            writer: Box::new(NotifierWriter {
                notifier,
                _adv: adv_handle,
                _app: app_handle,
            }),
            notifications: inbound_rx,
            peer_name: None,
            resolved: DeviceIdentity::new(identity.service, Some(write_uuid), Some(notify_uuid)),
        }))
    }
}

// ----------------------------------------------------------------------------
// Notifier Writer
// ----------------------------------------------------------------------------

/// Outbound endpoint of an inbound connection. Holds the advertisement and
/// application handles so dropping the writer tears the registration down.
struct NotifierWriter {
    notifier: bluer::gatt::local::CharacteristicNotifier,
    _adv: bluer::adv::AdvertisementHandle,
    _app: bluer::gatt::local::ApplicationHandle,
}

#[async_trait::async_trait]
impl LinkWriter for NotifierWriter {
    async fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        self.notifier
            .notify(data.to_vec())
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        // Registration handles are released when the writer drops.
        Ok(())
    }
}
