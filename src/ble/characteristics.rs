//! GATT attribute table.
//!
//! btleplug hands out services and characteristics by UUID and never exposes
//! ATT handles. The client, however, speaks in handles: it discovers a
//! service range, picks a characteristic value handle and writes the
//! configuration descriptor one handle further. [`AttributeTable`] lays the
//! discovered hierarchy out the way a GATT server would, so both views line
//! up.

use btleplug::api::{CharPropFlags, Characteristic, Descriptor, Service};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::radio::{AttributeHandle, HandleRange};
use crate::ble::uuids::{CCCD_UUID, INDICATIONS_ENABLE, NOTIFICATIONS_ENABLE};

/// What a handle resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeTarget {
    /// A characteristic value.
    Value(Characteristic),
    /// The client characteristic configuration descriptor of a characteristic.
    ClientConfig(Characteristic),
    /// Any other descriptor.
    Descriptor(Descriptor),
}

/// A service with its assigned handle range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Service UUID.
    pub uuid: Uuid,
    /// Handles covered by the service.
    pub range: HandleRange,
}

/// A characteristic with its value handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicEntry {
    /// The characteristic as btleplug knows it.
    pub characteristic: Characteristic,
    /// Value handle.
    pub value_handle: AttributeHandle,
}

/// Handle layout of a peer's GATT database.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    services: Vec<ServiceEntry>,
    characteristics: Vec<CharacteristicEntry>,
    targets: HashMap<AttributeHandle, AttributeTarget>,
}

impl AttributeTable {
    /// First assignable handle; 0 is reserved.
    const FIRST_HANDLE: u32 = 1;

    /// Lay out `services`, assigning handles in iteration order.
    ///
    /// Each service gets a declaration handle, then per characteristic a
    /// declaration, the value, a configuration descriptor directly after the
    /// value when it can notify or indicate, and one handle per remaining
    /// descriptor.
    pub fn build<'a>(services: impl IntoIterator<Item = &'a Service>) -> Self {
        let mut table = Self::default();
        let mut next = Self::FIRST_HANDLE;

        for service in services {
            let needed = service_footprint(service);
            if next + needed - 1 > u16::MAX as u32 {
                warn!("Handle space exhausted, dropping service {}", service.uuid);
                break;
            }

            let start = next;
            next += 1;

            for characteristic in &service.characteristics {
                // Skip the declaration handle.
                let value_handle = AttributeHandle((next + 1) as u16);
                next += 2;

                table
                    .targets
                    .insert(value_handle, AttributeTarget::Value(characteristic.clone()));

                if has_client_config(characteristic) {
                    table.targets.insert(
                        AttributeHandle(next as u16),
                        AttributeTarget::ClientConfig(characteristic.clone()),
                    );
                    next += 1;
                }

                for descriptor in &characteristic.descriptors {
                    if descriptor.uuid == CCCD_UUID {
                        continue;
                    }
                    table.targets.insert(
                        AttributeHandle(next as u16),
                        AttributeTarget::Descriptor(descriptor.clone()),
                    );
                    next += 1;
                }

                table.characteristics.push(CharacteristicEntry {
                    characteristic: characteristic.clone(),
                    value_handle,
                });
            }

            let range = HandleRange::new(start as u16, (next - 1) as u16);
            debug!("Service {} laid out at {}", service.uuid, range);
            table.services.push(ServiceEntry {
                uuid: service.uuid,
                range,
            });
        }

        table
    }

    /// Services, optionally restricted to one UUID.
    pub fn services(&self, filter: Option<Uuid>) -> impl Iterator<Item = &ServiceEntry> {
        self.services
            .iter()
            .filter(move |s| filter.map_or(true, |uuid| s.uuid == uuid))
    }

    /// Characteristics whose value handle lies within `range`.
    pub fn characteristics_in(
        &self,
        range: HandleRange,
    ) -> impl Iterator<Item = &CharacteristicEntry> {
        self.characteristics
            .iter()
            .filter(move |c| range.contains(c.value_handle))
    }

    /// Resolve a handle.
    pub fn resolve(&self, handle: AttributeHandle) -> Option<&AttributeTarget> {
        self.targets.get(&handle)
    }

    /// Value handle of the first characteristic with `uuid`.
    pub fn value_handle_of(&self, uuid: &Uuid) -> Option<AttributeHandle> {
        self.characteristics
            .iter()
            .find(|c| c.characteristic.uuid == *uuid)
            .map(|c| c.value_handle)
    }

    /// Check whether nothing was laid out.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Whether a configuration descriptor value turns on notifications or indications.
pub fn enables_updates(value: &[u8]) -> bool {
    let mask = NOTIFICATIONS_ENABLE[0] | INDICATIONS_ENABLE[0];
    value.first().map_or(false, |flags| flags & mask != 0)
}

fn has_client_config(characteristic: &Characteristic) -> bool {
    characteristic
        .properties
        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        || characteristic.descriptors.iter().any(|d| d.uuid == CCCD_UUID)
}

fn service_footprint(service: &Service) -> u32 {
    1 + service
        .characteristics
        .iter()
        .map(|c| {
            let others = c.descriptors.iter().filter(|d| d.uuid != CCCD_UUID).count() as u32;
            2 + u32::from(has_client_config(c)) + others
        })
        .sum::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{NUS_RX_UUID, NUS_SERVICE_UUID, NUS_TX_UUID};
    use std::collections::BTreeSet;

    const GAP_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1800_0000_1000_8000_00805f9b34fb);
    const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a00_0000_1000_8000_00805f9b34fb);
    const USER_DESCRIPTION_UUID: Uuid = Uuid::from_u128(0x0000_2901_0000_1000_8000_00805f9b34fb);

    fn characteristic(service: Uuid, uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: service,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    fn service(uuid: Uuid, characteristics: Vec<Characteristic>) -> Service {
        Service {
            uuid,
            primary: true,
            characteristics: characteristics.into_iter().collect(),
        }
    }

    fn nus_service() -> Service {
        let mut tx = characteristic(NUS_SERVICE_UUID, NUS_TX_UUID, CharPropFlags::NOTIFY);
        tx.descriptors.insert(Descriptor {
            uuid: USER_DESCRIPTION_UUID,
            service_uuid: NUS_SERVICE_UUID,
            characteristic_uuid: NUS_TX_UUID,
        });
        service(
            NUS_SERVICE_UUID,
            vec![
                characteristic(NUS_SERVICE_UUID, NUS_RX_UUID, CharPropFlags::WRITE),
                tx,
            ],
        )
    }

    fn gap_service() -> Service {
        service(
            GAP_SERVICE_UUID,
            vec![characteristic(
                GAP_SERVICE_UUID,
                DEVICE_NAME_UUID,
                CharPropFlags::READ,
            )],
        )
    }

    #[test]
    fn test_layout() {
        let services = vec![gap_service(), nus_service()];
        let table = AttributeTable::build(&services);

        // GAP: decl 1, char decl 2, value 3.
        let gap = table.services(Some(GAP_SERVICE_UUID)).next().unwrap();
        assert_eq!(gap.range, HandleRange::new(1, 3));

        // NUS: decl 4, RX decl 5 / value 6, TX decl 7 / value 8 / CCCD 9 / user description 10.
        let nus = table.services(Some(NUS_SERVICE_UUID)).next().unwrap();
        assert_eq!(nus.range, HandleRange::new(4, 10));

        assert_eq!(table.value_handle_of(&NUS_RX_UUID), Some(AttributeHandle(6)));
        assert_eq!(table.value_handle_of(&NUS_TX_UUID), Some(AttributeHandle(8)));
        assert_eq!(table.services(None).count(), 2);
    }

    #[test]
    fn test_cccd_follows_value_handle() {
        let services = vec![nus_service()];
        let table = AttributeTable::build(&services);
        let tx = table.value_handle_of(&NUS_TX_UUID).unwrap();

        match table.resolve(tx.next()) {
            Some(AttributeTarget::ClientConfig(c)) => assert_eq!(c.uuid, NUS_TX_UUID),
            other => panic!("expected CCCD, got {:?}", other),
        }
        match table.resolve(tx) {
            Some(AttributeTarget::Value(c)) => assert_eq!(c.uuid, NUS_TX_UUID),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_characteristics_in_range() {
        let services = vec![gap_service(), nus_service()];
        let table = AttributeTable::build(&services);
        let nus = table.services(Some(NUS_SERVICE_UUID)).next().unwrap().range;

        let uuids: Vec<Uuid> = table
            .characteristics_in(nus)
            .map(|c| c.characteristic.uuid)
            .collect();
        assert_eq!(uuids.len(), 2);
        assert!(uuids.contains(&NUS_RX_UUID));
        assert!(uuids.contains(&NUS_TX_UUID));
        assert!(!uuids.contains(&DEVICE_NAME_UUID));
    }

    #[test]
    fn test_unknown_handle() {
        let table = AttributeTable::build(&[gap_service()]);
        assert!(table.resolve(AttributeHandle(0)).is_none());
        assert!(table.resolve(AttributeHandle(42)).is_none());
        assert!(AttributeTable::build(&Vec::<Service>::new()).is_empty());
    }

    #[test]
    fn test_enables_updates() {
        assert!(enables_updates(&NOTIFICATIONS_ENABLE));
        assert!(enables_updates(&INDICATIONS_ENABLE));
        assert!(!enables_updates(&[0x00, 0x00]));
        assert!(!enables_updates(&[]));
    }
}
