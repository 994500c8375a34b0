//! BLE communication module.
//!
//! The radio abstraction the state machine drives, the advertisement parser,
//! and the btleplug-backed host radio.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod host;
pub mod indicator;
pub mod radio;
pub mod scanner;
pub mod uuids;

pub use advertising::{encode_service_uuids, parse_service_uuids, AdvertisedServices};
pub use characteristics::AttributeTable;
pub use connection::Link;
pub use host::{HostDriver, HostRadio};
pub use radio::{Radio, RadioCommand, RadioEvent, RadioOperation, RecordingRadio};
pub use scanner::BleScanner;
pub use uuids::*;
