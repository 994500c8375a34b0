//! Client configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{NOTIFICATIONS_ENABLE, NUS_SERVICE_UUID, NUS_TX_UUID};
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Greeting written to the target characteristic once subscribed.
pub const DEFAULT_GREETING: &[u8] = b"Hola desde cliente";

/// Settings fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientConfig {
    /// Service the peripheral must advertise.
    pub target_service: Uuid,
    /// Characteristic to subscribe to inside the target service.
    pub target_characteristic: Uuid,
    /// Length of one scan window before it is renewed.
    pub scan_duration: Duration,
    /// How often the idle loop checks whether a scan must be (re)issued.
    pub poll_interval: Duration,
    /// How long the host radio waits for a connection to come up.
    pub connect_timeout: Duration,
    /// Payload written to the characteristic value after subscribing.
    pub greeting: Vec<u8>,
    /// Value written to the configuration descriptor to enable notifications.
    pub notify_enable: Vec<u8>,
    /// Capacity of the notification and phase broadcast channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_service: NUS_SERVICE_UUID,
            target_characteristic: NUS_TX_UUID,
            scan_duration: Self::DEFAULT_SCAN_DURATION,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            greeting: DEFAULT_GREETING.to_vec(),
            notify_enable: NOTIFICATIONS_ENABLE.to_vec(),
            channel_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Default scan window (30 seconds).
    pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(30);
    /// Default idle poll interval (1 second).
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default connect timeout (10 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a configuration targeting the given service and characteristic.
    pub fn new(target_service: Uuid, target_characteristic: Uuid) -> Self {
        Self {
            target_service,
            target_characteristic,
            ..Self::default()
        }
    }

    /// Set the scan window.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the greeting payload.
    pub fn with_greeting(mut self, greeting: impl Into<Vec<u8>>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Set the broadcast channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.target_service.is_nil() {
            return Err(invalid("target_service", self.target_service));
        }
        if self.target_characteristic.is_nil() {
            return Err(invalid(
                "target_characteristic",
                self.target_characteristic,
            ));
        }
        for (name, value) in [
            ("scan_duration", self.scan_duration),
            ("poll_interval", self.poll_interval),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(name, format!("{:?}", value)));
            }
        }
        if self.notify_enable.is_empty() {
            return Err(invalid("notify_enable", "[]"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", 0));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.target_service, NUS_SERVICE_UUID);
        assert_eq!(config.target_characteristic, NUS_TX_UUID);
        assert_eq!(config.scan_duration, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.greeting, b"Hola desde cliente");
        assert_eq!(config.notify_enable, vec![0x01, 0x00]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::default()
            .with_scan_duration(Duration::from_secs(5))
            .with_greeting("hi")
            .with_channel_capacity(8);
        assert_eq!(config.scan_duration, Duration::from_secs(5));
        assert_eq!(config.greeting, b"hi");
        assert_eq!(config.channel_capacity, 8);
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let config = ClientConfig::default().with_scan_duration(Duration::ZERO);
        match config.validate() {
            Err(Error::InvalidParameter { name, .. }) => assert_eq!(name, "scan_duration"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_nil_uuid() {
        let config = ClientConfig::new(Uuid::nil(), NUS_TX_UUID);
        assert!(config.validate().is_err());
    }
}
