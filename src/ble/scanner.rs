//! BLE scanning for the host radio.
//!
//! Runs bounded scan windows on a btleplug adapter and turns advertisements
//! into [`RadioEvent::ScanResult`]s.

use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::encode_service_uuids;
use crate::ble::radio::{PeerAddress, RadioEvent};
use crate::error::Result;

/// Bounded-window scanner over one adapter.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// When the current scan window closes, if one is open.
    deadline: Option<Instant>,
    /// Peripherals seen while scanning, by address.
    discovered: HashMap<PeerAddress, Peripheral>,
}

impl BleScanner {
    /// Create a scanner on `adapter`.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            deadline: None,
            discovered: HashMap::new(),
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// When the open scan window closes.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check whether a scan window is open.
    pub fn is_scanning(&self) -> bool {
        self.deadline.is_some()
    }

    /// Open a scan window of `duration`, restarting any window already open.
    ///
    /// The window is armed even when the adapter refuses to scan, so the
    /// caller still sees it elapse and can retry.
    pub async fn start(&mut self, duration: Duration) -> Result<()> {
        self.deadline = Some(Instant::now() + duration);

        info!("Starting BLE scan ({:?} window)", duration);
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    /// Close the scan window.
    pub async fn stop(&mut self) -> Result<()> {
        if self.deadline.take().is_none() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");
        self.adapter.stop_scan().await?;
        Ok(())
    }

    /// The scan window elapsed: stop the adapter and report it.
    pub async fn expire(&mut self) -> RadioEvent {
        self.deadline = None;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop expired scan: {}", e);
        }
        debug!("Scan window elapsed");
        RadioEvent::ScanTimeout
    }

    /// Look up a peripheral seen while scanning.
    pub fn peripheral(&self, address: &PeerAddress) -> Option<Peripheral> {
        self.discovered.get(address).cloned()
    }

    /// Turn a central event into a scan result, if it carries an advertisement.
    pub async fn handle_event(&mut self, event: &CentralEvent) -> Option<RadioEvent> {
        if !self.is_scanning() {
            return None;
        }

        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => self.process_peripheral(id).await,
            _ => None,
        }
    }

    /// Build a scan result from a peripheral's advertised properties.
    async fn process_peripheral(&mut self, id: &PeripheralId) -> Option<RadioEvent> {
        let peripheral = match self.adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let address = PeerAddress::new(id.to_string());
        trace!(
            "Advertisement from {} ({:?}, rssi {:?}): {} services",
            address,
            properties.local_name,
            properties.rssi,
            properties.services.len()
        );

        self.discovered.insert(address.clone(), peripheral);

        Some(RadioEvent::ScanResult {
            address,
            payload: Bytes::from(encode_service_uuids(&properties.services)),
        })
    }
}
