//! Event routing.
//!
//! Maps each [`RadioEvent`] to the [`ConnectionStateMachine`] handler that
//! deals with it. Decisions live in the state machine; this module only
//! routes.

use std::fmt;
use tracing::debug;

use crate::ble::indicator::Indicator;
use crate::ble::radio::{Radio, RadioEvent};
use crate::session::{ConnectionStateMachine, Notification};

/// Kind tag of a radio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Advertisement received.
    ScanResult,
    /// Scan window elapsed.
    ScanTimeout,
    /// Connection established.
    Connect,
    /// Connection attempt failed.
    ConnectFailed,
    /// Link lost.
    Disconnect,
    /// Service discovered.
    ServiceResult,
    /// Characteristic discovered.
    CharacteristicResult,
    /// Discovery procedure finished.
    DiscoveryComplete,
    /// Notification received.
    Notify,
    /// Write rejected.
    WriteFailed,
    /// Not understood by this client.
    Unrecognized,
}

impl EventKind {
    /// Tag an event.
    pub fn of(event: &RadioEvent) -> Self {
        match event {
            RadioEvent::ScanResult { .. } => Self::ScanResult,
            RadioEvent::ScanTimeout => Self::ScanTimeout,
            RadioEvent::Connected(_) => Self::Connect,
            RadioEvent::ConnectFailed { .. } => Self::ConnectFailed,
            RadioEvent::Disconnected(_) => Self::Disconnect,
            RadioEvent::ServiceResult { .. } => Self::ServiceResult,
            RadioEvent::CharacteristicResult { .. } => Self::CharacteristicResult,
            RadioEvent::DiscoveryComplete { .. } => Self::DiscoveryComplete,
            RadioEvent::Notify { .. } => Self::Notify,
            RadioEvent::WriteFailed { .. } => Self::WriteFailed,
            RadioEvent::Unrecognized { .. } => Self::Unrecognized,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScanResult => "scan-result",
            Self::ScanTimeout => "scan-timeout",
            Self::Connect => "connect",
            Self::ConnectFailed => "connect-failed",
            Self::Disconnect => "disconnect",
            Self::ServiceResult => "service-result",
            Self::CharacteristicResult => "characteristic-result",
            Self::DiscoveryComplete => "discovery-complete",
            Self::Notify => "notify",
            Self::WriteFailed => "write-failed",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// Route one event to the state machine.
///
/// Returns the decoded notification when the event was one that the current
/// subscription accepted.
pub fn dispatch<R: Radio, I: Indicator>(
    machine: &mut ConnectionStateMachine<R, I>,
    event: RadioEvent,
) -> Option<Notification> {
    let kind = EventKind::of(&event);
    debug!("Dispatching {} in phase {}", kind, machine.phase());

    match event {
        RadioEvent::ScanResult { address, payload } => machine.on_scan_result(&address, &payload),
        RadioEvent::ScanTimeout => machine.on_scan_timeout(),
        RadioEvent::Connected(connection) => machine.on_connected(connection),
        RadioEvent::ConnectFailed { address } => machine.on_connect_failed(&address),
        RadioEvent::Disconnected(connection) => machine.on_disconnected(connection),
        RadioEvent::ServiceResult {
            connection,
            uuid,
            range,
        } => machine.on_service_result(connection, uuid, range),
        RadioEvent::CharacteristicResult {
            connection,
            uuid,
            value_handle,
            ..
        } => machine.on_characteristic_result(connection, uuid, value_handle),
        RadioEvent::DiscoveryComplete { connection, scope } => {
            machine.on_discovery_complete(connection, scope)
        }
        RadioEvent::Notify {
            connection,
            value_handle,
            payload,
        } => return machine.on_notify(connection, value_handle, payload),
        RadioEvent::WriteFailed {
            connection,
            handle,
            reason,
        } => machine.on_write_failed(connection, handle, &reason),
        RadioEvent::Unrecognized { code } => debug!("Ignoring unrecognized event {:#x}", code),
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::encode_service_uuids;
    use crate::ble::indicator::NoopIndicator;
    use crate::ble::radio::{
        AttributeHandle, ConnectionHandle, DiscoveryScope, HandleRange, PeerAddress, RadioCommand,
        RecordingRadio,
    };
    use crate::ble::uuids::{NUS_SERVICE_UUID, NUS_TX_UUID};
    use crate::config::ClientConfig;
    use crate::session::{NotificationPayload, Phase};
    use btleplug::api::CharPropFlags;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use uuid::Uuid;

    fn machine() -> ConnectionStateMachine<RecordingRadio, NoopIndicator> {
        ConnectionStateMachine::new(ClientConfig::default(), RecordingRadio::new(), NoopIndicator)
    }

    #[test]
    fn test_end_to_end_session() {
        let mut m = machine();
        let address = PeerAddress::new("C0:FF:EE:00:00:01");
        let conn = ConnectionHandle(1);

        m.ensure_scanning();
        m.radio_mut().take();

        dispatch(
            &mut m,
            RadioEvent::ScanResult {
                address: address.clone(),
                payload: Bytes::from(encode_service_uuids(&[NUS_SERVICE_UUID])),
            },
        );
        assert_eq!(
            m.radio_mut().take(),
            vec![
                RadioCommand::ScanStop,
                RadioCommand::Connect {
                    address: address.clone()
                }
            ]
        );

        dispatch(&mut m, RadioEvent::Connected(conn));
        assert_eq!(
            m.radio_mut().take(),
            vec![RadioCommand::DiscoverServices {
                connection: conn,
                filter: Some(NUS_SERVICE_UUID)
            }]
        );

        let target_range = HandleRange::new(0x0c, 0x11);
        dispatch(
            &mut m,
            RadioEvent::ServiceResult {
                connection: conn,
                uuid: Uuid::from_u128(0x1801),
                range: HandleRange::new(0x01, 0x0b),
            },
        );
        dispatch(
            &mut m,
            RadioEvent::ServiceResult {
                connection: conn,
                uuid: NUS_SERVICE_UUID,
                range: target_range,
            },
        );
        assert_eq!(
            m.radio_mut().take(),
            vec![RadioCommand::DiscoverCharacteristics {
                connection: conn,
                range: target_range
            }]
        );

        let h = AttributeHandle(0x0e);
        dispatch(
            &mut m,
            RadioEvent::CharacteristicResult {
                connection: conn,
                uuid: NUS_TX_UUID,
                value_handle: h,
                properties: CharPropFlags::NOTIFY,
            },
        );
        assert_eq!(m.phase(), Phase::Subscribed);
        assert_eq!(
            m.radio_mut().take(),
            vec![
                RadioCommand::Write {
                    connection: conn,
                    handle: AttributeHandle(0x0f),
                    data: Bytes::from_static(&[0x01, 0x00]),
                    with_response: true,
                },
                RadioCommand::Write {
                    connection: conn,
                    handle: h,
                    data: Bytes::from_static(b"Hola desde cliente"),
                    with_response: true,
                },
            ]
        );

        let text = dispatch(
            &mut m,
            RadioEvent::Notify {
                connection: conn,
                value_handle: h,
                payload: Bytes::from_static(b"buenas"),
            },
        )
        .unwrap();
        assert_eq!(text.payload, NotificationPayload::Text("buenas".to_string()));

        let raw = dispatch(
            &mut m,
            RadioEvent::Notify {
                connection: conn,
                value_handle: h,
                payload: Bytes::from_static(&[0xc3, 0x28]),
            },
        )
        .unwrap();
        assert_eq!(
            raw.payload,
            NotificationPayload::Raw(Bytes::from_static(&[0xc3, 0x28]))
        );
        assert_eq!(m.phase(), Phase::Subscribed);

        // A late characteristic-discovery completion changes nothing.
        dispatch(
            &mut m,
            RadioEvent::DiscoveryComplete {
                connection: conn,
                scope: DiscoveryScope::Characteristics,
            },
        );
        assert_eq!(m.phase(), Phase::Subscribed);

        dispatch(&mut m, RadioEvent::Disconnected(Some(conn)));
        assert_eq!(m.phase(), Phase::Scanning);
        assert_eq!(
            m.radio_mut().take(),
            vec![RadioCommand::ScanStart {
                duration: Duration::from_secs(30)
            }]
        );
    }

    #[test]
    fn test_no_matching_service_rescans() {
        let mut m = machine();
        let conn = ConnectionHandle(3);
        m.ensure_scanning();
        dispatch(
            &mut m,
            RadioEvent::ScanResult {
                address: PeerAddress::new("peer"),
                payload: Bytes::from(encode_service_uuids(&[NUS_SERVICE_UUID])),
            },
        );
        dispatch(&mut m, RadioEvent::Connected(conn));
        dispatch(
            &mut m,
            RadioEvent::DiscoveryComplete {
                connection: conn,
                scope: DiscoveryScope::Services,
            },
        );

        assert_eq!(m.phase(), Phase::Scanning);
        assert_eq!(m.session().connection_handle(), None);
    }

    #[test]
    fn test_unrecognized_event_is_ignored() {
        let mut m = machine();
        m.ensure_scanning();
        m.radio_mut().take();

        assert!(dispatch(&mut m, RadioEvent::Unrecognized { code: 0x1b }).is_none());
        assert_eq!(m.phase(), Phase::Scanning);
        assert!(m.radio().commands().is_empty());
    }

    #[test]
    fn test_event_kind_tags() {
        assert_eq!(EventKind::of(&RadioEvent::ScanTimeout), EventKind::ScanTimeout);
        assert_eq!(
            EventKind::of(&RadioEvent::Disconnected(None)),
            EventKind::Disconnect
        );
        assert_eq!(
            EventKind::of(&RadioEvent::Unrecognized { code: 1 }),
            EventKind::Unrecognized
        );
        assert_eq!(EventKind::CharacteristicResult.to_string(), "characteristic-result");
    }
}
