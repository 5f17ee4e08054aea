use thiserror::Error;

use crate::types::Field;

/// Errors produced while decoding a Treadmill Data notification
///
/// Decoding is all-or-nothing: either error discards the whole record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The record is too short to hold the 16-bit flags field
    #[error("Treadmill data too short: {len} bytes, need at least 2 for flags")]
    TooShort {
        /// Length of the received record
        len: usize,
    },

    /// The flags announce a field that the record does not contain
    #[error("Treadmill data truncated at {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field that could not be read
        field: Field,
        /// Width of the field in bytes
        needed: usize,
        /// Bytes left in the record when the field was reached
        remaining: usize,
    },
}

/// Errors that can occur while talking to an FTMS treadmill
#[derive(Error, Debug)]
pub enum FtmsError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter is available on this host
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// Scan finished without seeing the configured device
    #[error("Treadmill '{name}' not found")]
    DeviceNotFound {
        /// Advertised name that was searched for
        name: String,
    },

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// A required GATT characteristic is not exposed by the device
    #[error("{name} characteristic ({uuid:04X}) not found on device")]
    CharacteristicMissing {
        /// Human readable characteristic name
        name: &'static str,
        /// GATT short UUID
        uuid: u16,
    },

    /// Writing to the control point failed
    #[error("Failed to write command: {0}")]
    WriteFailed(String),

    /// Subscribing to or receiving notifications failed
    #[error("Notification error: {0}")]
    NotifyFailed(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// No telemetry notification arrived within the read window
    #[error("No treadmill data received within {window_ms}ms")]
    NoTelemetry {
        /// Read window in milliseconds
        window_ms: u64,
    },

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Telemetry could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Too many unanticipated failures in a row; the poll loop gives up
    #[error("Giving up after {failures} consecutive failures: {source}")]
    FailureLimitExceeded {
        /// Number of consecutive failures observed
        failures: u32,
        /// The failure that crossed the limit
        #[source]
        source: Box<FtmsError>,
    },
}

/// Result type for treadmill operations
pub type Result<T> = std::result::Result<T, FtmsError>;

impl FtmsError {
    /// Check if this error is an anticipated condition that is simply retried
    /// on the next poll tick without counting against the failure limit
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::ConnectionFailed(_)
                | Self::CharacteristicMissing { .. }
                | Self::Timeout { .. }
                | Self::NoTelemetry { .. }
                | Self::Disconnected
                | Self::Decode(_)
        )
    }

    /// Check if this error ends the poll loop
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FailureLimitExceeded { .. })
    }
}
