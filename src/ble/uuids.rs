//! BLE Service, Characteristic and Descriptor UUIDs.

use uuid::Uuid;

// Nordic UART Service
/// Nordic UART Service UUID.
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// NUS RX characteristic UUID (client writes).
pub const NUS_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// NUS TX characteristic UUID (peripheral notifies).
pub const NUS_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

// Standard descriptors
/// Client Characteristic Configuration descriptor UUID.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Value written to a CCCD to enable notifications (little-endian 0x0001).
pub const NOTIFICATIONS_ENABLE: [u8; 2] = [0x01, 0x00];
/// Value written to a CCCD to enable indications (little-endian 0x0002).
pub const INDICATIONS_ENABLE: [u8; 2] = [0x02, 0x00];
