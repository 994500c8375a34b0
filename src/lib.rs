// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # nus-central
//!
//! A Bluetooth Low Energy central that finds a peripheral advertising a
//! target service, connects, locates a target characteristic, enables its
//! notifications, sends a greeting and then reports every notification the
//! peer pushes.
//!
//! The default target is the Nordic UART Service TX characteristic.
//!
//! ## Features
//!
//! - **Advertisement Filtering**: Match peers on 128-bit service UUIDs in the raw AD payload
//! - **Guided Discovery**: Service by UUID, then characteristic by UUID inside its range
//! - **Subscription**: Enable notifications, then write the greeting
//! - **Text Notifications**: UTF-8 payloads as text, anything else as raw bytes
//! - **Self-healing**: Any disconnect or failure falls back to scanning
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nus_central::{CentralClient, ClientConfig, HostRadio, LogIndicator, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::default();
//!
//!     // Open the adapter and start executing radio commands
//!     let (radio, events, driver) = HostRadio::open(&config).await?;
//!     tokio::spawn(driver.run());
//!
//!     let client = CentralClient::new(config, radio, LogIndicator::new())?;
//!     let mut notifications = client.subscribe_notifications();
//!     tokio::spawn(client.run(events));
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         println!("Received: {}", notification.payload);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for [`ClientConfig`]

// Public modules
pub mod ble;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use client::{CentralClient, ClientControl, ClientHandle, ClientStatus};
pub use config::{ClientConfig, DEFAULT_GREETING};
pub use dispatcher::{dispatch, EventKind};
pub use error::{Error, Result};
pub use session::{
    ConnectionStateMachine, Notification, NotificationPayload, Phase, PhaseChange, ResetReason,
    Session,
};

// Re-export commonly used types from submodules
pub use ble::host::{HostDriver, HostRadio};
pub use ble::indicator::{Indicator, IndicatorState, LogIndicator, NoopIndicator};
pub use ble::radio::{
    AttributeHandle, ConnectionHandle, HandleRange, PeerAddress, Radio, RadioCommand, RadioEvent,
};
