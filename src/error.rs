//! Error types for the GATT serial transport

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the transport and its link backends
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,

    #[error("Bluetooth radio is powered off")]
    RadioOff,

    #[error("invalid hardware address: {address}")]
    InvalidAddress { address: String },

    #[error("device not found: {address}")]
    DeviceNotFound { address: String },

    #[error("GATT service not found: {service}")]
    ServiceNotFound { service: Uuid },

    #[error("GATT characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: Uuid },

    #[error("transport is not connected")]
    NotConnected,

    #[error("no target address configured")]
    NoAddressConfigured,

    #[error("read size must be greater than zero")]
    InvalidReadSize,

    #[error("read timed out after {received} of {requested} bytes")]
    TimedOut { received: usize, requested: usize },

    #[error("read cancelled after {received} of {requested} bytes")]
    Cancelled { received: usize, requested: usize },

    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("failed to advertise: {0}")]
    AdvertisingFailed(String),

    #[error("BLE advertising is not supported on this platform")]
    AdvertisingUnsupported,
}

/// Result alias used throughout the crate
pub type TransportResult<T> = Result<T, TransportError>;
