//! Radio abstraction.
//!
//! The state machine never talks to a Bluetooth stack directly. It issues
//! requests through the [`Radio`] trait and learns about their outcome later,
//! through [`RadioEvent`]s delivered by whatever drives the radio.

use btleplug::api::CharPropFlags;
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque identifier of an established link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u16);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// ATT attribute handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeHandle(pub u16);

impl AttributeHandle {
    /// Handle immediately following this one.
    ///
    /// For a characteristic value handle this is where the client
    /// characteristic configuration descriptor conventionally lives.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Inclusive range of attribute handles belonging to one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRange {
    /// First handle (the service declaration).
    pub start: AttributeHandle,
    /// Last handle of the service.
    pub end: AttributeHandle,
}

impl HandleRange {
    /// Create a range from raw handle values.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start: AttributeHandle(start),
            end: AttributeHandle(end),
        }
    }

    /// Check whether `handle` falls inside the range.
    pub fn contains(&self, handle: AttributeHandle) -> bool {
        self.start <= handle && handle <= self.end
    }
}

impl fmt::Display for HandleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Address of an advertising peer, as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub String);

impl PeerAddress {
    /// Create an address from anything string-like.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which discovery procedure a completion signal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryScope {
    /// Primary service discovery.
    Services,
    /// Characteristic discovery inside one service range.
    Characteristics,
}

/// Request issued to the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// Start a scan that stops by itself after `duration`.
    ScanStart {
        /// Length of the scan window.
        duration: Duration,
    },
    /// Stop any running scan.
    ScanStop,
    /// Connect to an advertising peer.
    Connect {
        /// Peer to connect to.
        address: PeerAddress,
    },
    /// Tear down a link.
    Disconnect {
        /// Link to tear down.
        connection: ConnectionHandle,
    },
    /// Discover primary services, optionally only those with a given UUID.
    DiscoverServices {
        /// Link to run discovery on.
        connection: ConnectionHandle,
        /// Optional service UUID filter.
        filter: Option<Uuid>,
    },
    /// Discover the characteristics inside a service range.
    DiscoverCharacteristics {
        /// Link to run discovery on.
        connection: ConnectionHandle,
        /// Range of the service to search.
        range: HandleRange,
    },
    /// Write an attribute value.
    Write {
        /// Link to write on.
        connection: ConnectionHandle,
        /// Target attribute.
        handle: AttributeHandle,
        /// Bytes to write.
        data: Bytes,
        /// Whether the peer must acknowledge the write.
        with_response: bool,
    },
}

/// Asynchronous event delivered by the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// An advertisement was received while scanning.
    ScanResult {
        /// Advertiser address.
        address: PeerAddress,
        /// Raw AD structures.
        payload: Bytes,
    },
    /// The bounded scan window elapsed.
    ScanTimeout,
    /// A connection attempt succeeded.
    Connected(ConnectionHandle),
    /// A connection attempt failed or timed out.
    ConnectFailed {
        /// Peer that could not be reached.
        address: PeerAddress,
    },
    /// A link went down. `None` when the radio cannot tell which one.
    Disconnected(Option<ConnectionHandle>),
    /// One primary service found.
    ServiceResult {
        /// Link the result belongs to.
        connection: ConnectionHandle,
        /// Service UUID.
        uuid: Uuid,
        /// Handle range of the service.
        range: HandleRange,
    },
    /// One characteristic found.
    CharacteristicResult {
        /// Link the result belongs to.
        connection: ConnectionHandle,
        /// Characteristic UUID.
        uuid: Uuid,
        /// Handle of the characteristic value.
        value_handle: AttributeHandle,
        /// Characteristic properties.
        properties: CharPropFlags,
    },
    /// A discovery procedure finished.
    DiscoveryComplete {
        /// Link the procedure ran on.
        connection: ConnectionHandle,
        /// Which procedure finished.
        scope: DiscoveryScope,
    },
    /// A notification arrived.
    Notify {
        /// Link the notification arrived on.
        connection: ConnectionHandle,
        /// Value handle of the notifying characteristic.
        value_handle: AttributeHandle,
        /// Notified value.
        payload: Bytes,
    },
    /// A previously requested write was rejected.
    WriteFailed {
        /// Link the write was issued on.
        connection: ConnectionHandle,
        /// Attribute the write targeted.
        handle: AttributeHandle,
        /// Description of the failure.
        reason: String,
    },
    /// Event the radio knows about but this client does not.
    Unrecognized {
        /// Raw event code.
        code: u16,
    },
}

/// Outbound half of the platform BLE stack.
///
/// Every method only submits a request; the outcome arrives later as a
/// [`RadioEvent`]. An `Err` means the request could not even be submitted.
pub trait Radio {
    /// Start a scan that ends by itself after `duration`.
    fn scan_start(&mut self, duration: Duration) -> Result<()>;

    /// Stop scanning.
    fn scan_stop(&mut self) -> Result<()>;

    /// Connect to `address`.
    fn connect(&mut self, address: &PeerAddress) -> Result<()>;

    /// Disconnect `connection`.
    fn disconnect(&mut self, connection: ConnectionHandle) -> Result<()>;

    /// Discover primary services, restricted to `filter` when given.
    fn discover_services(&mut self, connection: ConnectionHandle, filter: Option<Uuid>)
        -> Result<()>;

    /// Discover characteristics within `range`.
    fn discover_characteristics(
        &mut self,
        connection: ConnectionHandle,
        range: HandleRange,
    ) -> Result<()>;

    /// Write `data` to `handle`.
    fn write(
        &mut self,
        connection: ConnectionHandle,
        handle: AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;
}

/// Kind of request, without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioOperation {
    /// `scan_start`.
    ScanStart,
    /// `scan_stop`.
    ScanStop,
    /// `connect`.
    Connect,
    /// `disconnect`.
    Disconnect,
    /// `discover_services`.
    DiscoverServices,
    /// `discover_characteristics`.
    DiscoverCharacteristics,
    /// `write`.
    Write,
}

impl RadioCommand {
    /// The kind of this command.
    pub fn operation(&self) -> RadioOperation {
        match self {
            Self::ScanStart { .. } => RadioOperation::ScanStart,
            Self::ScanStop => RadioOperation::ScanStop,
            Self::Connect { .. } => RadioOperation::Connect,
            Self::Disconnect { .. } => RadioOperation::Disconnect,
            Self::DiscoverServices { .. } => RadioOperation::DiscoverServices,
            Self::DiscoverCharacteristics { .. } => RadioOperation::DiscoverCharacteristics,
            Self::Write { .. } => RadioOperation::Write,
        }
    }
}

/// Radio that records every command instead of executing it.
///
/// Useful for driving the state machine from scripted events. Individual
/// operations can be made to fail submission; failed commands are not
/// recorded.
#[derive(Debug, Default)]
pub struct RecordingRadio {
    commands: Vec<RadioCommand>,
    failing: HashSet<RadioOperation>,
}

impl RecordingRadio {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submission of `operation` fail, or succeed again.
    pub fn fail(&mut self, operation: RadioOperation, fail: bool) {
        if fail {
            self.failing.insert(operation);
        } else {
            self.failing.remove(&operation);
        }
    }

    /// Make every subsequent `write` fail to submit.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail(RadioOperation::Write, fail);
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> &[RadioCommand] {
        &self.commands
    }

    /// Take the recorded commands, leaving the recorder empty.
    pub fn take(&mut self) -> Vec<RadioCommand> {
        std::mem::take(&mut self.commands)
    }

    fn record(&mut self, command: RadioCommand) -> Result<()> {
        if self.failing.contains(&command.operation()) {
            return Err(Error::RadioClosed);
        }
        self.commands.push(command);
        Ok(())
    }
}

impl Radio for RecordingRadio {
    fn scan_start(&mut self, duration: Duration) -> Result<()> {
        self.record(RadioCommand::ScanStart { duration })
    }

    fn scan_stop(&mut self) -> Result<()> {
        self.record(RadioCommand::ScanStop)
    }

    fn connect(&mut self, address: &PeerAddress) -> Result<()> {
        self.record(RadioCommand::Connect {
            address: address.clone(),
        })
    }

    fn disconnect(&mut self, connection: ConnectionHandle) -> Result<()> {
        self.record(RadioCommand::Disconnect { connection })
    }

    fn discover_services(
        &mut self,
        connection: ConnectionHandle,
        filter: Option<Uuid>,
    ) -> Result<()> {
        self.record(RadioCommand::DiscoverServices { connection, filter })
    }

    fn discover_characteristics(
        &mut self,
        connection: ConnectionHandle,
        range: HandleRange,
    ) -> Result<()> {
        self.record(RadioCommand::DiscoverCharacteristics { connection, range })
    }

    fn write(
        &mut self,
        connection: ConnectionHandle,
        handle: AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        self.record(RadioCommand::Write {
            connection,
            handle,
            data: Bytes::copy_from_slice(data),
            with_response,
        })
    }
}
