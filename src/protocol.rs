//! GATT endpoint identity and wire framing

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportResult;

// ----------------------------------------------------------------------------
// Default Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Default serial service UUID
pub const SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56798abcdef0);

/// Default characteristic accepting outbound payloads
pub const SERIAL_WRITE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56798abcdef1);

/// Default characteristic the peer emits notifications on
pub const SERIAL_NOTIFY_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56798abcdef2);

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// The three GATT endpoints that make up one logical serial connection.
///
/// `write` and `notify` may be left unset for a client; the endpoints are
/// then resolved from the connected device's characteristic properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Service UUID
    pub service: Uuid,
    /// Characteristic accepting caller-submitted payloads
    pub write: Option<Uuid>,
    /// Characteristic the remote peer asynchronously emits values on
    pub notify: Option<Uuid>,
}

impl DeviceIdentity {
    /// Create an identity from known UUIDs
    pub fn new(service: Uuid, write: Option<Uuid>, notify: Option<Uuid>) -> Self {
        Self {
            service,
            write,
            notify,
        }
    }

    /// Parse an identity from UUID text. Invalid text fails construction.
    pub fn from_strs(
        service: &str,
        write: Option<&str>,
        notify: Option<&str>,
    ) -> TransportResult<Self> {
        Ok(Self {
            service: Uuid::parse_str(service)?,
            write: write.map(Uuid::parse_str).transpose()?,
            notify: notify.map(Uuid::parse_str).transpose()?,
        })
    }

    /// Write characteristic, falling back to the crate default
    pub fn write_or_default(&self) -> Uuid {
        self.write.unwrap_or(SERIAL_WRITE_UUID)
    }

    /// Notify characteristic, falling back to the crate default
    pub fn notify_or_default(&self) -> Uuid {
        self.notify.unwrap_or(SERIAL_NOTIFY_UUID)
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            service: SERIAL_SERVICE_UUID,
            write: Some(SERIAL_WRITE_UUID),
            notify: Some(SERIAL_NOTIFY_UUID),
        }
    }
}

// ----------------------------------------------------------------------------
// Wire Framing
// ----------------------------------------------------------------------------

/// Size of the frame length header in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Encode one frame: a little-endian u32 length followed by the payload.
///
/// Little-endian is the fixed wire convention for this crate; client and
/// server must agree on it. A zero-length payload is a legal empty frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode the payload length from a frame header
pub fn frame_length(header: &[u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_le_bytes(*header) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_strs() {
        let identity = DeviceIdentity::from_strs(
            "0000abf0-0000-1000-8000-00805f9b34fb",
            Some("0000abf1-0000-1000-8000-00805f9b34fb"),
            Some("0000abf2-0000-1000-8000-00805f9b34fb"),
        )
        .unwrap();
        assert_eq!(
            identity.service,
            Uuid::parse_str("0000abf0-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert!(identity.write.is_some());
        assert!(identity.notify.is_some());
    }

    #[test]
    fn test_identity_rejects_invalid_uuid() {
        assert!(DeviceIdentity::from_strs("not-a-uuid", None, None).is_err());
        assert!(DeviceIdentity::from_strs(
            "0000abf0-0000-1000-8000-00805f9b34fb",
            Some("bogus"),
            None
        )
        .is_err());
    }

    #[test]
    fn test_default_identity() {
        let identity = DeviceIdentity::default();
        assert_eq!(identity.service, SERIAL_SERVICE_UUID);
        assert_eq!(identity.write_or_default(), SERIAL_WRITE_UUID);
        assert_eq!(identity.notify_or_default(), SERIAL_NOTIFY_UUID);
    }

    #[test]
    fn test_frame_header_is_little_endian() {
        let frame = encode_frame(&[0xAA; 258]);
        assert_eq!(&frame[..FRAME_HEADER_LEN], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 258);
    }

    #[test]
    fn test_frame_length_round_trip() {
        for len in [0usize, 1, 255, 256, 65536] {
            let payload = vec![0x5Au8; len];
            let frame = encode_frame(&payload);
            let header: [u8; FRAME_HEADER_LEN] = frame[..FRAME_HEADER_LEN].try_into().unwrap();
            assert_eq!(frame_length(&header), len);
            assert_eq!(&frame[FRAME_HEADER_LEN..], payload.as_slice());
        }
    }

    #[test]
    fn test_empty_frame_is_header_only() {
        assert_eq!(encode_frame(&[]), vec![0, 0, 0, 0]);
    }
}
