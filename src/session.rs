//! Connection and discovery state machine.
//!
//! [`ConnectionStateMachine`] owns the single [`Session`] and advances it one
//! radio event at a time. Handlers never wait on the radio: they submit the
//! next request and return, and the outcome arrives as a later event. Every
//! failure path ends in the same place, a fresh scan.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::AdvertisedServices;
use crate::ble::indicator::Indicator;
use crate::ble::radio::{
    AttributeHandle, ConnectionHandle, DiscoveryScope, HandleRange, PeerAddress, Radio,
};
use crate::config::ClientConfig;

/// Where the client is in the connect/discover/subscribe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Scanning for an advertiser of the target service.
    Scanning,
    /// Connection requested, waiting for the outcome.
    Connecting,
    /// Connected, looking for the target service.
    ServiceDiscovery,
    /// Target service found, looking for the target characteristic.
    CharacteristicDiscovery,
    /// Notifications enabled on the target characteristic.
    Subscribed,
}

impl Phase {
    /// Check whether a link is held in this phase.
    pub fn holds_link(&self) -> bool {
        matches!(
            self,
            Self::ServiceDiscovery | Self::CharacteristicDiscovery | Self::Subscribed
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceDiscovery => write!(f, "ServiceDiscovery"),
            Self::CharacteristicDiscovery => write!(f, "CharacteristicDiscovery"),
            Self::Subscribed => write!(f, "Subscribed"),
        }
    }
}

/// State of the one logical session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    phase: Phase,
    connection_handle: Option<ConnectionHandle>,
    target_characteristic_handle: Option<AttributeHandle>,
    service_range: Option<HandleRange>,
    scan_active: bool,
}

impl Session {
    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handle of the held link, if any.
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.connection_handle
    }

    /// Value handle of the target characteristic, once found.
    pub fn target_characteristic_handle(&self) -> Option<AttributeHandle> {
        self.target_characteristic_handle
    }

    /// Handle range of the target service, once found.
    pub fn service_range(&self) -> Option<HandleRange> {
        self.service_range
    }

    /// Whether a scan window is believed to be open.
    pub fn scan_active(&self) -> bool {
        self.scan_active
    }

    fn clear_link(&mut self) {
        self.connection_handle = None;
        self.target_characteristic_handle = None;
        self.service_range = None;
    }
}

/// Why the session went back to scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetReason {
    /// The link went down.
    Disconnected,
    /// The connection attempt failed.
    ConnectFailed,
    /// Service discovery finished without the target service.
    ServiceNotFound,
    /// Characteristic discovery finished without the target characteristic.
    CharacteristicNotFound,
    /// A reconnect was requested explicitly.
    ReconnectRequested,
    /// The radio refused a request needed to make progress.
    RadioRequestFailed,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::ServiceNotFound => write!(f, "service not found"),
            Self::CharacteristicNotFound => write!(f, "characteristic not found"),
            Self::ReconnectRequested => write!(f, "reconnect requested"),
            Self::RadioRequestFailed => write!(f, "radio request failed"),
        }
    }
}

/// Notification value, decoded as text when possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationPayload {
    /// Valid UTF-8.
    Text(String),
    /// Anything else, passed through untouched.
    Raw(Bytes),
}

impl NotificationPayload {
    /// Decode a notification value.
    pub fn decode(payload: Bytes) -> Self {
        match std::str::from_utf8(&payload) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Raw(payload),
        }
    }

    /// The text, if the value decoded as such.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Raw(_) => None,
        }
    }
}

impl fmt::Display for NotificationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{:?}", text),
            Self::Raw(raw) => write!(f, "{:02x?}", raw.as_ref()),
        }
    }
}

/// A notification received while subscribed.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Link it arrived on.
    pub connection: ConnectionHandle,
    /// Value handle of the notifying characteristic.
    pub value_handle: AttributeHandle,
    /// Decoded value.
    pub payload: NotificationPayload,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

/// Phase transition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    /// Phase before the transition.
    pub from: Phase,
    /// Phase after the transition.
    pub to: Phase,
}

/// The connection/discovery state machine.
pub struct ConnectionStateMachine<R, I> {
    config: ClientConfig,
    session: Session,
    radio: R,
    indicator: I,
    notification_tx: broadcast::Sender<Notification>,
    phase_tx: broadcast::Sender<PhaseChange>,
}

impl<R: Radio, I: Indicator> ConnectionStateMachine<R, I> {
    /// Create a machine in the `Idle` phase.
    pub fn new(config: ClientConfig, radio: R, indicator: I) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (notification_tx, _) = broadcast::channel(capacity);
        let (phase_tx, _) = broadcast::channel(capacity);

        Self {
            config,
            session: Session::default(),
            radio,
            indicator,
            notification_tx,
            phase_tx,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    /// Read-only view of the session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Check whether a link is held.
    pub fn is_connected(&self) -> bool {
        self.session.connection_handle.is_some()
    }

    /// The configuration the machine runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The radio the machine drives.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable access to the radio.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// The indicator the machine signals.
    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Subscribe to decoded notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }

    /// Subscribe to phase transitions.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<PhaseChange> {
        self.phase_tx.subscribe()
    }

    /// Start scanning unless a link is held or a scan window is already open.
    ///
    /// Called from the idle poll. Returns whether a scan was requested.
    pub fn ensure_scanning(&mut self) -> bool {
        let may_scan = matches!(self.session.phase, Phase::Idle | Phase::Scanning);
        if !may_scan || self.session.connection_handle.is_some() || self.session.scan_active {
            return false;
        }

        self.enter_scanning();
        self.session.scan_active
    }

    /// Drop whatever the session is doing and start over from scanning.
    pub fn reconnect(&mut self) {
        info!("Reconnect requested in phase {}", self.session.phase);
        self.reset(ResetReason::ReconnectRequested);
    }

    /// An advertisement was received.
    pub fn on_scan_result(&mut self, address: &PeerAddress, payload: &[u8]) {
        if self.session.phase != Phase::Scanning {
            trace!("Ignoring advertisement from {} in phase {}", address, self.session.phase);
            return;
        }

        let services = AdvertisedServices::parse(payload);
        if !services.contains(&self.config.target_service) {
            trace!("{} does not advertise the target service", address);
            return;
        }

        info!("Found {} advertising {}", address, self.config.target_service);

        if let Err(e) = self.radio.scan_stop() {
            warn!("Failed to stop scan: {}", e);
        }
        self.session.scan_active = false;

        match self.radio.connect(address) {
            Ok(()) => self.set_phase(Phase::Connecting),
            Err(e) => {
                warn!("Failed to request connection to {}: {}", address, e);
                self.reset(ResetReason::RadioRequestFailed);
            }
        }
    }

    /// The scan window closed without a match.
    pub fn on_scan_timeout(&mut self) {
        self.session.scan_active = false;

        if self.session.phase == Phase::Scanning {
            debug!("Scan window elapsed, renewing");
            self.start_scan();
        }
    }

    /// A connection attempt succeeded.
    pub fn on_connected(&mut self, connection: ConnectionHandle) {
        if self.session.phase != Phase::Connecting {
            warn!(
                "Unexpected connection {} in phase {}, releasing it",
                connection, self.session.phase
            );
            if let Err(e) = self.radio.disconnect(connection) {
                warn!("Failed to release {}: {}", connection, e);
            }
            return;
        }

        info!("Connected ({}), discovering services", connection);
        self.session.connection_handle = Some(connection);
        self.set_phase(Phase::ServiceDiscovery);
        self.indicator.set_connected();

        if let Err(e) = self
            .radio
            .discover_services(connection, Some(self.config.target_service))
        {
            warn!("Failed to request service discovery: {}", e);
            self.reset(ResetReason::RadioRequestFailed);
        }
    }

    /// A connection attempt failed.
    pub fn on_connect_failed(&mut self, address: &PeerAddress) {
        if self.session.phase != Phase::Connecting {
            debug!("Ignoring connect failure for {} in phase {}", address, self.session.phase);
            return;
        }

        warn!("Connection to {} failed", address);
        self.reset(ResetReason::ConnectFailed);
    }

    /// A link went down.
    pub fn on_disconnected(&mut self, connection: Option<ConnectionHandle>) {
        if let Some(handle) = connection {
            if self.session.connection_handle != Some(handle) {
                debug!("Ignoring disconnect of stale link {}", handle);
                return;
            }
        }

        info!("Disconnected in phase {}", self.session.phase);
        self.reset(ResetReason::Disconnected);
    }

    /// One primary service was discovered.
    pub fn on_service_result(
        &mut self,
        connection: ConnectionHandle,
        uuid: Uuid,
        range: HandleRange,
    ) {
        if !self.expects(Phase::ServiceDiscovery, connection) {
            trace!("Ignoring service {} in phase {}", uuid, self.session.phase);
            return;
        }

        if uuid != self.config.target_service {
            debug!("Skipping service {} ({})", uuid, range);
            return;
        }

        info!("Found target service at {}, discovering characteristics", range);
        self.session.service_range = Some(range);
        self.set_phase(Phase::CharacteristicDiscovery);

        if let Err(e) = self.radio.discover_characteristics(connection, range) {
            warn!("Failed to request characteristic discovery: {}", e);
            self.reset(ResetReason::RadioRequestFailed);
        }
    }

    /// One characteristic was discovered.
    pub fn on_characteristic_result(
        &mut self,
        connection: ConnectionHandle,
        uuid: Uuid,
        value_handle: AttributeHandle,
    ) {
        if !self.expects(Phase::CharacteristicDiscovery, connection) {
            trace!("Ignoring characteristic {} in phase {}", uuid, self.session.phase);
            return;
        }

        if uuid != self.config.target_characteristic {
            debug!("Skipping characteristic {} at {}", uuid, value_handle);
            return;
        }

        info!("Found target characteristic at {}, subscribing", value_handle);
        self.session.target_characteristic_handle = Some(value_handle);
        self.set_phase(Phase::Subscribed);
        self.subscribe(connection, value_handle);
    }

    /// A discovery procedure finished.
    pub fn on_discovery_complete(&mut self, connection: ConnectionHandle, scope: DiscoveryScope) {
        if self.session.connection_handle != Some(connection) {
            trace!("Ignoring discovery completion on stale link {}", connection);
            return;
        }

        match (self.session.phase, scope) {
            (Phase::ServiceDiscovery, DiscoveryScope::Services) => {
                warn!("Target service {} not found", self.config.target_service);
                self.reset(ResetReason::ServiceNotFound);
            }
            (Phase::CharacteristicDiscovery, DiscoveryScope::Characteristics) => {
                warn!(
                    "Target characteristic {} not found",
                    self.config.target_characteristic
                );
                self.reset(ResetReason::CharacteristicNotFound);
            }
            (phase, scope) => trace!("{:?} discovery complete in phase {}", scope, phase),
        }
    }

    /// A notification arrived.
    ///
    /// Returns the decoded notification, or `None` when it does not belong to
    /// the current subscription: wrong phase, stale link, or a value handle
    /// other than the target characteristic.
    pub fn on_notify(
        &mut self,
        connection: ConnectionHandle,
        value_handle: AttributeHandle,
        payload: Bytes,
    ) -> Option<Notification> {
        if !self.expects(Phase::Subscribed, connection) {
            debug!(
                "Ignoring notification from {} in phase {}",
                value_handle, self.session.phase
            );
            return None;
        }

        if self.session.target_characteristic_handle != Some(value_handle) {
            debug!("Ignoring notification from non-target handle {}", value_handle);
            return None;
        }

        let payload = NotificationPayload::decode(payload);
        match &payload {
            NotificationPayload::Text(text) => info!("Notification: {}", text),
            NotificationPayload::Raw(raw) => {
                warn!("Notification is not valid text, raw bytes: {:02x?}", raw.as_ref())
            }
        }

        let notification = Notification {
            connection,
            value_handle,
            payload,
            received_at: Utc::now(),
        };
        let _ = self.notification_tx.send(notification.clone());

        Some(notification)
    }

    /// A write was rejected by the peer or the radio.
    pub fn on_write_failed(
        &mut self,
        connection: ConnectionHandle,
        handle: AttributeHandle,
        reason: &str,
    ) {
        warn!("Write to {} on {} failed: {}", handle, connection, reason);
    }

    /// Enable notifications, then send the greeting.
    fn subscribe(&mut self, connection: ConnectionHandle, value_handle: AttributeHandle) {
        let cccd = value_handle.next();
        if let Err(e) = self
            .radio
            .write(connection, cccd, &self.config.notify_enable, true)
        {
            warn!("Failed to enable notifications at {}: {}", cccd, e);
        }

        if let Err(e) = self
            .radio
            .write(connection, value_handle, &self.config.greeting, true)
        {
            warn!("Failed to send greeting to {}: {}", value_handle, e);
        }
    }

    fn expects(&self, phase: Phase, connection: ConnectionHandle) -> bool {
        self.session.phase == phase && self.session.connection_handle == Some(connection)
    }

    fn reset(&mut self, reason: ResetReason) {
        if let Some(connection) = self.session.connection_handle {
            if reason != ResetReason::Disconnected {
                debug!("Releasing {} ({})", connection, reason);
                if let Err(e) = self.radio.disconnect(connection) {
                    warn!("Failed to disconnect {}: {}", connection, e);
                }
            }
        }

        info!("Restarting discovery: {}", reason);
        self.enter_scanning();
    }

    fn enter_scanning(&mut self) {
        self.session.clear_link();
        self.set_phase(Phase::Scanning);
        self.indicator.set_searching();
        self.start_scan();
    }

    fn start_scan(&mut self) {
        match self.radio.scan_start(self.config.scan_duration) {
            Ok(()) => {
                debug!("Scanning for {:?}", self.config.scan_duration);
                self.session.scan_active = true;
            }
            Err(e) => {
                warn!("Failed to start scan: {}", e);
                self.session.scan_active = false;
            }
        }
    }

    fn set_phase(&mut self, new_phase: Phase) {
        let old_phase = std::mem::replace(&mut self.session.phase, new_phase);
        if old_phase != new_phase {
            debug!("Phase changed: {} -> {}", old_phase, new_phase);
            let _ = self.phase_tx.send(PhaseChange {
                from: old_phase,
                to: new_phase,
            });
        }
    }
}
