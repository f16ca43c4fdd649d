//! Server-role advertising with platform dispatch

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use std::time::Duration;

use crate::error::TransportResult;
use crate::link::LinkHandle;
use crate::protocol::DeviceIdentity;

// ----------------------------------------------------------------------------
// Advertiser Trait
// ----------------------------------------------------------------------------

/// Platform advertising backend: publish the service and wait for a client
#[async_trait::async_trait]
pub trait BleAdvertiser: Send {
    /// Advertise the identity and block until a client attaches or the
    /// timeout elapses. `Ok(None)` means timeout.
    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>>;
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific advertiser enum
pub enum PlatformAdvertiser {
    #[cfg(target_os = "linux")]
    Linux(linux::LinuxAdvertiser),
    #[allow(dead_code)]
    Fallback(fallback::FallbackAdvertiser),
}

impl PlatformAdvertiser {
    /// Create the appropriate advertiser for the current platform
    pub fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::LinuxAdvertiser::new())
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(fallback::FallbackAdvertiser::new())
        }
    }
}

impl Default for PlatformAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for PlatformAdvertiser {
    async fn advertise(
        &mut self,
        identity: &DeviceIdentity,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Option<LinkHandle>> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => {
                advertiser.advertise(identity, local_name, timeout).await
            }
            Self::Fallback(ref mut advertiser) => {
                advertiser.advertise(identity, local_name, timeout).await
            }
        }
    }
}
