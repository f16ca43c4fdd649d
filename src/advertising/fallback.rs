//! Fallback advertising implementation for unsupported platforms

use std::time::Duration;

use tracing::warn;

use crate::error::{TransportError, TransportResult};
use crate::link::LinkHandle;
use crate::protocol::DeviceIdentity;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Advertising stand-in for platforms without peripheral-mode support.
/// Surfaces an error instead of silently succeeding so a server role never
/// appears to be listening when nothing is.
pub struct FallbackAdvertiser;

impl FallbackAdvertiser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FallbackAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for FallbackAdvertiser {
    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        _timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>> {
        warn!(
            "BLE advertising not supported on this platform; '{}' (service {}) cannot listen",
            local_name, identity.service
        );
        Err(TransportError::AdvertisingUnsupported)
    }
}
