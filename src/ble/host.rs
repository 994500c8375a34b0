//! Host radio backed by btleplug.
//!
//! [`HostRadio`] is the [`Radio`] handed to the state machine: it only queues
//! [`RadioCommand`]s. [`HostDriver`] owns the adapter, executes the queued
//! commands one at a time in submission order, and reports outcomes and
//! platform events as [`RadioEvent`]s.

use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _};
use btleplug::platform::Manager;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::connection::Link;
use crate::ble::radio::{
    AttributeHandle, ConnectionHandle, HandleRange, PeerAddress, Radio, RadioCommand, RadioEvent,
};
use crate::ble::scanner::BleScanner;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Command-queueing radio.
#[derive(Debug, Clone)]
pub struct HostRadio {
    command_tx: mpsc::UnboundedSender<RadioCommand>,
}

impl HostRadio {
    /// Open the first Bluetooth adapter.
    ///
    /// Returns the radio for the state machine, the event stream to feed the
    /// client, and the driver that must be run for anything to happen.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn open(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>, HostDriver)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = HostDriver {
            scanner: BleScanner::with_adapter(adapter),
            commands: command_rx,
            events: event_tx,
            link: None,
            next_connection: 0,
            connect_timeout: config.connect_timeout,
        };

        Ok((Self { command_tx }, event_rx, driver))
    }

    fn submit(&self, command: RadioCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::RadioClosed)
    }
}

impl Radio for HostRadio {
    fn scan_start(&mut self, duration: Duration) -> Result<()> {
        self.submit(RadioCommand::ScanStart { duration })
    }

    fn scan_stop(&mut self) -> Result<()> {
        self.submit(RadioCommand::ScanStop)
    }

    fn connect(&mut self, address: &PeerAddress) -> Result<()> {
        self.submit(RadioCommand::Connect {
            address: address.clone(),
        })
    }

    fn disconnect(&mut self, connection: ConnectionHandle) -> Result<()> {
        self.submit(RadioCommand::Disconnect { connection })
    }

    fn discover_services(
        &mut self,
        connection: ConnectionHandle,
        filter: Option<Uuid>,
    ) -> Result<()> {
        self.submit(RadioCommand::DiscoverServices { connection, filter })
    }

    fn discover_characteristics(
        &mut self,
        connection: ConnectionHandle,
        range: HandleRange,
    ) -> Result<()> {
        self.submit(RadioCommand::DiscoverCharacteristics { connection, range })
    }

    fn write(
        &mut self,
        connection: ConnectionHandle,
        handle: AttributeHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        self.submit(RadioCommand::Write {
            connection,
            handle,
            data: Bytes::copy_from_slice(data),
            with_response,
        })
    }
}

/// Executes radio commands against btleplug.
pub struct HostDriver {
    scanner: BleScanner,
    commands: mpsc::UnboundedReceiver<RadioCommand>,
    events: mpsc::UnboundedSender<RadioEvent>,
    link: Option<Link>,
    next_connection: u16,
    connect_timeout: Duration,
}

impl HostDriver {
    /// Run until every [`HostRadio`] clone is dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut central_events = self.scanner.adapter().events().await?;

        loop {
            let deadline = self.scanner.deadline();
            let expiry = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => {
                        debug!("Radio command channel closed");
                        break;
                    }
                },
                Some(event) = central_events.next() => {
                    self.handle_central_event(event).await;
                }
                Some(event) = next_notification(&mut self.link) => {
                    self.emit(event);
                }
                _ = expiry, if deadline.is_some() => {
                    let event = self.scanner.expire().await;
                    self.emit(event);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn execute(&mut self, command: RadioCommand) {
        debug!("Executing {:?}", command);

        match command {
            RadioCommand::ScanStart { duration } => {
                if let Err(e) = self.scanner.start(duration).await {
                    warn!("Failed to start scan: {}", e);
                }
            }
            RadioCommand::ScanStop => {
                if let Err(e) = self.scanner.stop().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            RadioCommand::Connect { address } => self.connect(address).await,
            RadioCommand::Disconnect { connection } => self.disconnect(connection).await,
            RadioCommand::DiscoverServices { connection, filter } => {
                let events = match self.link_for(connection) {
                    Some(link) => link.discover_services(filter).await,
                    None => Vec::new(),
                };
                self.emit_all(events);
            }
            RadioCommand::DiscoverCharacteristics { connection, range } => {
                let events = match self.link_for(connection) {
                    Some(link) => link.discover_characteristics(range),
                    None => Vec::new(),
                };
                self.emit_all(events);
            }
            RadioCommand::Write {
                connection,
                handle,
                data,
                with_response,
            } => {
                let result = match self.link_for(connection) {
                    Some(link) => link.write(handle, &data, with_response).await,
                    None => Err(Error::NotConnected),
                };
                if let Err(e) = result {
                    self.emit(RadioEvent::WriteFailed {
                        connection,
                        handle,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn connect(&mut self, address: PeerAddress) {
        if let Some(link) = &self.link {
            warn!("Refusing to connect to {}: {} is still up", address, link.handle());
            self.emit(RadioEvent::ConnectFailed { address });
            return;
        }

        let peripheral = match self.scanner.peripheral(&address) {
            Some(p) => p,
            None => {
                warn!("{}", Error::PeripheralNotFound { address: address.to_string() });
                self.emit(RadioEvent::ConnectFailed { address });
                return;
            }
        };

        self.next_connection = self.next_connection.wrapping_add(1);
        let handle = ConnectionHandle(self.next_connection);

        match Link::connect(peripheral, handle, self.connect_timeout).await {
            Ok(link) => {
                self.link = Some(link);
                self.emit(RadioEvent::Connected(handle));
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                self.emit(RadioEvent::ConnectFailed { address });
            }
        }
    }

    async fn disconnect(&mut self, connection: ConnectionHandle) {
        if self.link.as_ref().map(Link::handle) != Some(connection) {
            debug!("Ignoring disconnect of unknown link {}", connection);
            return;
        }

        if let Some(link) = self.link.take() {
            if let Err(e) = link.disconnect().await {
                warn!("Failed to disconnect {}: {}", connection, e);
            }
        }
        self.emit(RadioEvent::Disconnected(Some(connection)));
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        if let CentralEvent::DeviceDisconnected(id) = &event {
            let ours = self
                .link
                .as_ref()
                .map_or(false, |link| link.peripheral().id() == *id);
            if ours {
                if let Some(link) = self.link.take() {
                    info!("Link {} dropped by peer", link.handle());
                    self.emit(RadioEvent::Disconnected(Some(link.handle())));
                }
            }
            return;
        }

        if let Some(event) = self.scanner.handle_event(&event).await {
            self.emit(event);
        }
    }

    fn link_for(&mut self, connection: ConnectionHandle) -> Option<&mut Link> {
        match self.link.as_mut() {
            Some(link) if link.handle() == connection => Some(link),
            _ => {
                debug!("No link {}", connection);
                None
            }
        }
    }

    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Radio event dropped, client is gone");
        }
    }

    fn emit_all(&self, events: Vec<RadioEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.scanner.stop().await {
            warn!("Failed to stop scan on shutdown: {}", e);
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.disconnect().await {
                warn!("Failed to disconnect on shutdown: {}", e);
            }
        }
    }
}

async fn next_notification(link: &mut Option<Link>) -> Option<RadioEvent> {
    match link.as_mut() {
        Some(link) => link.next_notification().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_radio_queues_commands_in_order() {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let mut radio = HostRadio { command_tx };
        let conn = ConnectionHandle(1);

        radio.write(conn, AttributeHandle(0x0f), &[0x01, 0x00], true).unwrap();
        radio.write(conn, AttributeHandle(0x0e), b"hi", true).unwrap();

        match command_rx.recv().await {
            Some(RadioCommand::Write { handle, .. }) => assert_eq!(handle, AttributeHandle(0x0f)),
            other => panic!("unexpected command: {:?}", other),
        }
        match command_rx.recv().await {
            Some(RadioCommand::Write { handle, data, .. }) => {
                assert_eq!(handle, AttributeHandle(0x0e));
                assert_eq!(data, Bytes::from_static(b"hi"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_host_radio_reports_closed_driver() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        drop(command_rx);
        let mut radio = HostRadio { command_tx };

        assert!(matches!(radio.scan_stop(), Err(Error::RadioClosed)));
    }
}
