//! BLE link management for the host radio.
//!
//! A [`Link`] wraps one connected btleplug peripheral together with the
//! attribute table laid out for it, and turns handle-based requests into
//! btleplug calls.

use btleplug::api::{Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{enables_updates, AttributeTable, AttributeTarget};
use crate::ble::radio::{
    AttributeHandle, ConnectionHandle, DiscoveryScope, HandleRange, RadioEvent,
};
use crate::error::{Error, Result};

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// One established connection.
pub struct Link {
    handle: ConnectionHandle,
    peripheral: Peripheral,
    table: AttributeTable,
    notifications: Option<NotificationStream>,
}

impl Link {
    /// Connect to `peripheral`, giving up after `timeout`.
    pub async fn connect(
        peripheral: Peripheral,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Self> {
        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            match tokio::time::timeout(timeout, peripheral.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(Error::Bluetooth(e)),
                Err(_) => {
                    // Abandon the half-open attempt.
                    let _ = peripheral.disconnect().await;
                    return Err(Error::Timeout);
                }
            }
        }

        info!("Connected to {:?} as {}", peripheral.id(), handle);

        Ok(Self {
            handle,
            peripheral,
            table: AttributeTable::default(),
            notifications: None,
        })
    }

    /// Handle assigned to this link.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// The connected peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Run service discovery and report the results as events.
    ///
    /// The completion event is always last, also when discovery failed.
    pub async fn discover_services(&mut self, filter: Option<Uuid>) -> Vec<RadioEvent> {
        let mut events = Vec::new();

        match self.peripheral.discover_services().await {
            Ok(()) => {
                self.table = AttributeTable::build(&self.peripheral.services());
                for service in self.table.services(filter) {
                    debug!("Found service {} at {}", service.uuid, service.range);
                    events.push(RadioEvent::ServiceResult {
                        connection: self.handle,
                        uuid: service.uuid,
                        range: service.range,
                    });
                }
            }
            Err(e) => warn!("Failed to discover services: {}", e),
        }

        events.push(RadioEvent::DiscoveryComplete {
            connection: self.handle,
            scope: DiscoveryScope::Services,
        });
        events
    }

    /// Report the characteristics within `range` as events.
    pub fn discover_characteristics(&self, range: HandleRange) -> Vec<RadioEvent> {
        let mut events: Vec<RadioEvent> = self
            .table
            .characteristics_in(range)
            .map(|entry| RadioEvent::CharacteristicResult {
                connection: self.handle,
                uuid: entry.characteristic.uuid,
                value_handle: entry.value_handle,
                properties: entry.characteristic.properties,
            })
            .collect();

        events.push(RadioEvent::DiscoveryComplete {
            connection: self.handle,
            scope: DiscoveryScope::Characteristics,
        });
        events
    }

    /// Write `data` to the attribute at `handle`.
    ///
    /// Writes to a configuration descriptor become subscribe/unsubscribe
    /// calls, since btleplug manages those descriptors itself.
    pub async fn write(
        &mut self,
        handle: AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let target = self
            .table
            .resolve(handle)
            .cloned()
            .ok_or(Error::UnknownHandle { handle: handle.0 })?;

        match target {
            AttributeTarget::Value(characteristic) => {
                let write_type = if with_response {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                self.peripheral
                    .write(&characteristic, data, write_type)
                    .await?;
                trace!("Wrote {} bytes to {}", data.len(), characteristic.uuid);
            }
            AttributeTarget::ClientConfig(characteristic) => {
                if enables_updates(data) {
                    self.peripheral.subscribe(&characteristic).await?;
                    if self.notifications.is_none() {
                        self.notifications = Some(self.peripheral.notifications().await?);
                    }
                    debug!("Subscribed to {}", characteristic.uuid);
                } else {
                    self.peripheral.unsubscribe(&characteristic).await?;
                    debug!("Unsubscribed from {}", characteristic.uuid);
                }
            }
            AttributeTarget::Descriptor(descriptor) => {
                self.peripheral.write_descriptor(&descriptor, data).await?;
                trace!("Wrote {} bytes to descriptor {}", data.len(), descriptor.uuid);
            }
        }

        Ok(())
    }

    /// Wait for the next notification on this link.
    ///
    /// Pends forever while not subscribed. Returns `None` once the stream
    /// has ended.
    pub async fn next_notification(&mut self) -> Option<RadioEvent> {
        let stream = match self.notifications.as_mut() {
            Some(stream) => stream,
            None => return std::future::pending().await,
        };

        match stream.next().await {
            Some(notification) => Some(self.notification_event(notification)),
            None => {
                debug!("Notification stream ended");
                self.notifications = None;
                None
            }
        }
    }

    /// Tear the link down.
    pub async fn disconnect(self) -> Result<()> {
        info!("Disconnecting {}", self.handle);
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn notification_event(&self, notification: ValueNotification) -> RadioEvent {
        // Handle 0 is never assigned.
        let value_handle = self
            .table
            .value_handle_of(&notification.uuid)
            .unwrap_or(AttributeHandle(0));

        RadioEvent::Notify {
            connection: self.handle,
            value_handle,
            payload: Bytes::from(notification.value),
        }
    }
}
