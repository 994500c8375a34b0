//! Advertising data parsing.
//!
//! Decodes the 128-bit service UUID lists out of raw advertisement payloads.
//! A payload is a sequence of AD structures, each laid out as
//! `[length, ad_type, data...]` where `length` counts the type byte plus data.

use std::collections::HashSet;
use tracing::trace;
use uuid::Uuid;

/// AD type: incomplete list of 128-bit service UUIDs.
pub const AD_TYPE_INCOMPLETE_128_BIT_UUIDS: u8 = 0x06;
/// AD type: complete list of 128-bit service UUIDs.
pub const AD_TYPE_COMPLETE_128_BIT_UUIDS: u8 = 0x07;

/// Size of a 128-bit UUID on the air.
const UUID_128_LEN: usize = 16;

/// Most UUIDs that fit in one AD structure (the length byte tops out at 255).
const UUIDS_PER_RECORD: usize = (u8::MAX as usize - 1) / UUID_128_LEN;

/// Set of 128-bit service UUIDs advertised in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisedServices {
    uuids: HashSet<Uuid>,
}

impl AdvertisedServices {
    /// Parse the advertised 128-bit service UUIDs out of a raw payload.
    ///
    /// Never fails. A zero length byte ends the payload. A record whose
    /// length runs past the end of the buffer is decoded up to the last whole
    /// UUID that is present, and parsing stops there. Trailing bytes that do
    /// not form a whole UUID are ignored.
    pub fn parse(payload: &[u8]) -> Self {
        let mut uuids = HashSet::new();
        let mut cursor = 0;

        while cursor + 1 < payload.len() {
            let length = payload[cursor] as usize;
            if length == 0 {
                break;
            }

            let declared_end = cursor + 1 + length;
            let end = declared_end.min(payload.len());

            let ad_type = payload[cursor + 1];
            if is_128_bit_uuid_list(ad_type) {
                for chunk in payload[cursor + 2..end].chunks_exact(UUID_128_LEN) {
                    uuids.insert(uuid_from_le_bytes(chunk));
                }
            }

            if declared_end > payload.len() {
                trace!(
                    "AD record at offset {} overruns payload ({} > {})",
                    cursor,
                    declared_end,
                    payload.len()
                );
                break;
            }

            cursor = declared_end;
        }

        Self { uuids }
    }

    /// Check whether `uuid` was advertised.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.uuids.contains(uuid)
    }

    /// Number of distinct UUIDs advertised.
    pub fn len(&self) -> usize {
        self.uuids.len()
    }

    /// Check whether no 128-bit UUID was advertised.
    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }

    /// Consume into the underlying set.
    pub fn into_inner(self) -> HashSet<Uuid> {
        self.uuids
    }
}

/// Parse the advertised 128-bit service UUIDs out of a raw payload.
pub fn parse_service_uuids(payload: &[u8]) -> HashSet<Uuid> {
    AdvertisedServices::parse(payload).into_inner()
}

/// Encode service UUIDs as complete-list AD structures.
///
/// Lists longer than one structure can hold are split across several.
/// An empty slice encodes to an empty payload.
pub fn encode_service_uuids(uuids: &[Uuid]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(uuids.len() * UUID_128_LEN + 2);

    for group in uuids.chunks(UUIDS_PER_RECORD) {
        payload.push((1 + group.len() * UUID_128_LEN) as u8);
        payload.push(AD_TYPE_COMPLETE_128_BIT_UUIDS);
        for uuid in group {
            payload.extend_from_slice(&uuid.as_u128().to_le_bytes());
        }
    }

    payload
}

fn is_128_bit_uuid_list(ad_type: u8) -> bool {
    matches!(
        ad_type,
        AD_TYPE_INCOMPLETE_128_BIT_UUIDS | AD_TYPE_COMPLETE_128_BIT_UUIDS
    )
}

// UUIDs travel least-significant byte first.
fn uuid_from_le_bytes(chunk: &[u8]) -> Uuid {
    let mut raw = [0u8; UUID_128_LEN];
    raw.copy_from_slice(chunk);
    Uuid::from_u128(u128::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{NUS_RX_UUID, NUS_SERVICE_UUID, NUS_TX_UUID};
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn record(ad_type: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![(data.len() + 1) as u8, ad_type];
        out.extend_from_slice(data);
        out
    }

    fn le(uuid: Uuid) -> [u8; 16] {
        uuid.as_u128().to_le_bytes()
    }

    #[test]
    fn test_parse_complete_list() {
        let payload = record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID));
        let services = AdvertisedServices::parse(&payload);
        assert_eq!(services.len(), 1);
        assert!(services.contains(&NUS_SERVICE_UUID));
    }

    #[test]
    fn test_parse_incomplete_list_with_two_uuids() {
        let mut data = le(NUS_RX_UUID).to_vec();
        data.extend_from_slice(&le(NUS_TX_UUID));
        let payload = record(AD_TYPE_INCOMPLETE_128_BIT_UUIDS, &data);

        let services = AdvertisedServices::parse(&payload);
        assert!(services.contains(&NUS_RX_UUID));
        assert!(services.contains(&NUS_TX_UUID));
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn test_parse_skips_other_records() {
        // Flags, then a shortened local name, then the UUID list.
        let mut payload = record(0x01, &[0x06]);
        payload.extend(record(0x08, b"nus"));
        payload.extend(record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID)));

        let services = AdvertisedServices::parse(&payload);
        assert!(services.contains(&NUS_SERVICE_UUID));
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn test_parse_ignores_trailing_partial_uuid() {
        let mut data = le(NUS_SERVICE_UUID).to_vec();
        data.extend_from_slice(&[0xaa; 5]);
        let payload = record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &data);

        let services = AdvertisedServices::parse(&payload);
        assert_eq!(services.len(), 1);
        assert!(services.contains(&NUS_SERVICE_UUID));
    }

    #[test]
    fn test_parse_stops_at_zero_length() {
        let mut payload = vec![0x00];
        payload.extend(record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID)));
        assert!(AdvertisedServices::parse(&payload).is_empty());
    }

    #[test]
    fn test_parse_truncated_record_keeps_earlier_uuids() {
        let mut payload = record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID));
        // Claims 17 bytes but only carries 2.
        payload.extend_from_slice(&[17, AD_TYPE_COMPLETE_128_BIT_UUIDS, 0x01, 0x02]);

        let services = AdvertisedServices::parse(&payload);
        assert_eq!(services.len(), 1);
        assert!(services.contains(&NUS_SERVICE_UUID));
    }

    #[test]
    fn test_parse_truncated_record_keeps_whole_uuids() {
        // Claims two UUIDs but carries one plus three stray bytes.
        let mut payload = vec![33, AD_TYPE_COMPLETE_128_BIT_UUIDS];
        payload.extend_from_slice(&le(NUS_SERVICE_UUID));
        payload.extend_from_slice(&[0x01, 0x02, 0x03]);

        let services = AdvertisedServices::parse(&payload);
        assert_eq!(services.len(), 1);
        assert!(services.contains(&NUS_SERVICE_UUID));
    }

    #[test]
    fn test_parse_stops_after_truncated_record() {
        // A truncated flags record swallows what follows.
        let mut payload = vec![40, 0x01, 0x06];
        payload.extend(record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID)));
        assert!(AdvertisedServices::parse(&payload).is_empty());
    }

    #[test]
    fn test_parse_lone_length_byte() {
        assert!(AdvertisedServices::parse(&[0x05]).is_empty());
        assert!(AdvertisedServices::parse(&[]).is_empty());
    }

    #[test]
    fn test_byte_order_is_little_endian() {
        let mut payload = vec![17, AD_TYPE_COMPLETE_128_BIT_UUIDS];
        // 6e400001-b5a3-f393-e0a9-e50e24dcca9e reversed.
        payload.extend_from_slice(&[
            0x9e, 0xca, 0xdc, 0x24, 0x0e, 0xe5, 0xa9, 0xe0, 0x93, 0xf3, 0xa3, 0xb5, 0x01, 0x00,
            0x40, 0x6e,
        ]);
        assert!(AdvertisedServices::parse(&payload).contains(&NUS_SERVICE_UUID));
    }

    #[test]
    fn test_encode_round_trips_through_parse() {
        let uuids: Vec<Uuid> = (0..20u128).map(Uuid::from_u128).collect();
        let payload = encode_service_uuids(&uuids);

        // 20 UUIDs do not fit one record.
        assert_eq!(payload[0] as usize, 1 + UUIDS_PER_RECORD * 16);

        let parsed = parse_service_uuids(&payload);
        assert_eq!(parsed.len(), 20);
        assert!(uuids.iter().all(|u| parsed.contains(u)));
    }

    #[test]
    fn test_encode_empty() {
        assert!(encode_service_uuids(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_target_record_is_found(
            prefix in vec((2u8..0x06, vec(any::<u8>(), 0..8)), 0..4),
            others in vec(any::<u128>(), 0..3),
        ) {
            let mut payload = Vec::new();
            for (ad_type, data) in &prefix {
                payload.extend(record(*ad_type, data));
            }
            let mut data = Vec::new();
            for other in &others {
                data.extend_from_slice(&other.to_le_bytes());
            }
            data.extend_from_slice(&le(NUS_SERVICE_UUID));
            payload.extend(record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &data));

            prop_assert!(AdvertisedServices::parse(&payload).contains(&NUS_SERVICE_UUID));
        }

        #[test]
        fn prop_payload_without_uuid_lists_yields_nothing(
            records in vec((0x08u8..0xff, vec(any::<u8>(), 0..20)), 0..5),
        ) {
            let mut payload = Vec::new();
            for (ad_type, data) in &records {
                payload.extend(record(*ad_type, data));
            }
            prop_assert!(!AdvertisedServices::parse(&payload).contains(&NUS_SERVICE_UUID));
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(payload in vec(any::<u8>(), 0..64)) {
            let _ = AdvertisedServices::parse(&payload);
        }

        #[test]
        fn prop_truncation_keeps_prefix(cut in 1usize..17) {
            let mut payload = record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_SERVICE_UUID));
            let second = record(AD_TYPE_COMPLETE_128_BIT_UUIDS, &le(NUS_TX_UUID));
            payload.extend_from_slice(&second[..second.len() - cut]);

            let services = AdvertisedServices::parse(&payload);
            prop_assert!(services.contains(&NUS_SERVICE_UUID));
            prop_assert!(!services.contains(&NUS_TX_UUID));
        }
    }
}
