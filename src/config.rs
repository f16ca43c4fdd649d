//! Transport configuration

use std::time::Duration;

use crate::protocol::DeviceIdentity;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the GATT serial transport
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransportConfig {
    /// Hardware address of the remote device ("XX:XX:XX:XX:XX:XX").
    /// Absent for the server role.
    pub address: Option<String>,
    /// GATT service/characteristic UUIDs. When omitted for a client, the
    /// endpoints are auto-discovered on the connected device.
    pub identity: Option<DeviceIdentity>,
    /// Whether this endpoint waits for an inbound connection
    pub is_server: bool,
    /// Maximum time to wait for the peer during `open` (`None` = unbounded)
    pub discovery_timeout: Option<Duration>,
    /// How long a discovery scan runs by default
    pub scan_duration: Duration,
    /// Maximum time to wait for a link-level connect
    pub connection_timeout: Duration,
    /// Upper bound on a single frame payload accepted by `read_packet`
    pub max_frame_size: usize,
    /// Local name placed in the advertisement (server role)
    pub local_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: None,
            identity: None,
            is_server: false,
            discovery_timeout: None,
            scan_duration: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            max_frame_size: 1024 * 1024,
            local_name: "gatt-serial".to_string(),
        }
    }
}

impl TransportConfig {
    /// Client-role configuration targeting the given hardware address
    pub fn client(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Server-role configuration
    pub fn server() -> Self {
        Self {
            is_server: true,
            ..Self::default()
        }
    }

    /// Set the GATT endpoint identity
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the discovery/advertise timeout used by `open`
    pub fn with_discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the default scan duration
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the link-level connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the maximum accepted frame payload size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the advertised local name
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_constructors() {
        let client = TransportConfig::client("AA:BB:CC:DD:EE:FF");
        assert!(!client.is_server);
        assert_eq!(client.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));

        let server = TransportConfig::server();
        assert!(server.is_server);
        assert!(server.address.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let config = TransportConfig::server()
            .with_scan_duration(Duration::from_secs(2))
            .with_max_frame_size(4096)
            .with_local_name("bench");
        assert_eq!(config.scan_duration, Duration::from_secs(2));
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.local_name, "bench");
    }
}
