//! Error types for the nus-central crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The advertising peer is not known to the radio.
    #[error("Peripheral not found: {address}")]
    PeripheralNotFound {
        /// The address that was looked up.
        address: String,
    },

    /// Operation requires a connection but none is held.
    #[error("Not connected")]
    NotConnected,

    /// An attribute handle does not map to anything on the peer.
    #[error("Unknown attribute handle: {handle:#06x}")]
    UnknownHandle {
        /// The raw handle value.
        handle: u16,
    },

    /// A radio operation did not finish in time.
    #[error("Radio operation timed out")]
    Timeout,

    /// The radio driver is gone and no longer accepts commands.
    #[error("Radio channel closed")]
    RadioClosed,

    /// The client run loop has stopped and no longer accepts requests.
    #[error("Client stopped")]
    ClientStopped,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
