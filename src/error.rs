//! Error types for the distance-sensor-ble crate.

use thiserror::Error;

/// The main error type for this crate.
///
/// Every variant except [`Error::BluetoothUnavailable`], [`Error::RadioClosed`]
/// and [`Error::Internal`] is recovered by the connection controller. It logs
/// the cause and goes back to scanning.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Link establishment was refused or timed out.
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// The peripheral we tried to reach.
        address: String,
        /// Description of why the connection failed.
        reason: String,
    },

    /// The peripheral does not expose the target service.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The target service does not contain the target characteristic.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The characteristic exists but cannot notify.
    #[error("Characteristic {uuid} does not support notifications")]
    NotifyUnsupported {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// The link dropped while a session was live.
    #[error("Unexpected disconnect from {address}")]
    UnexpectedDisconnect {
        /// The peripheral that went away.
        address: String,
    },

    /// A handle was used that the radio no longer knows about.
    #[error("Not connected (connection {connection})")]
    NotConnected {
        /// The stale connection handle.
        connection: u64,
    },

    /// The requested operation is not supported by the radio.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// The radio event stream ended.
    #[error("Radio event stream closed")]
    RadioClosed,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the controller can recover from this error by rescanning.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::BluetoothUnavailable | Self::RadioClosed | Self::Internal(_)
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
