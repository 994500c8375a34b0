//! Client run loop.
//!
//! [`CentralClient`] owns the state machine and is the only thing that
//! touches it. Radio events, control requests and the idle poll are all
//! serialized through one `select!` loop, so handlers always run to
//! completion before the next input is looked at.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ble::indicator::Indicator;
use crate::ble::radio::{ConnectionHandle, Radio, RadioEvent};
use crate::config::ClientConfig;
use crate::dispatcher::dispatch;
use crate::error::{Error, Result};
use crate::session::{ConnectionStateMachine, Notification, Phase, PhaseChange};

/// Request sent to a running client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientControl {
    /// Drop the current session and start over.
    Reconnect,
    /// Leave the run loop.
    Shutdown,
}

/// Snapshot of a running client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStatus {
    /// Current phase.
    pub phase: Phase,
    /// Held link, if any.
    pub connection: Option<ConnectionHandle>,
    /// Notifications accepted since start.
    pub notifications_received: u64,
}

/// Cloneable handle for observing and steering a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    control_tx: mpsc::UnboundedSender<ClientControl>,
    status: Arc<RwLock<ClientStatus>>,
}

impl ClientHandle {
    /// Ask the client to drop its session and scan again.
    pub fn reconnect(&self) -> Result<()> {
        self.send(ClientControl::Reconnect)
    }

    /// Ask the client to stop.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ClientControl::Shutdown)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> ClientStatus {
        *self.status.read()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.status.read().phase
    }

    /// Check whether a link is held.
    pub fn is_connected(&self) -> bool {
        self.status.read().connection.is_some()
    }

    fn send(&self, control: ClientControl) -> Result<()> {
        self.control_tx
            .send(control)
            .map_err(|_| Error::ClientStopped)
    }
}

/// The central-role client.
pub struct CentralClient<R, I> {
    machine: ConnectionStateMachine<R, I>,
    control_tx: mpsc::UnboundedSender<ClientControl>,
    control_rx: mpsc::UnboundedReceiver<ClientControl>,
    status: Arc<RwLock<ClientStatus>>,
    poll_interval: Duration,
}

impl<R: Radio, I: Indicator> CentralClient<R, I> {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: ClientConfig, radio: R, indicator: I) -> Result<Self> {
        config.validate()?;

        let poll_interval = config.poll_interval;
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(Self {
            machine: ConnectionStateMachine::new(config, radio, indicator),
            control_tx,
            control_rx,
            status: Arc::new(RwLock::new(ClientStatus::default())),
            poll_interval,
        })
    }

    /// Handle for steering the client once it runs.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            control_tx: self.control_tx.clone(),
            status: self.status.clone(),
        }
    }

    /// Subscribe to decoded notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.machine.subscribe_notifications()
    }

    /// Subscribe to phase transitions.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<PhaseChange> {
        self.machine.subscribe_phases()
    }

    /// The state machine.
    pub fn machine(&self) -> &ConnectionStateMachine<R, I> {
        &self.machine
    }

    /// Run until shut down or until the radio event stream ends.
    ///
    /// Returns the state machine so its final state can be inspected.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> ConnectionStateMachine<R, I> {
        info!(
            "Client starting, looking for service {}",
            self.machine.config().target_service
        );

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        poll.tick().await;

        self.machine.ensure_scanning();
        self.publish_status(false);

        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(event) => {
                        let notified = dispatch(&mut self.machine, event).is_some();
                        self.publish_status(notified);
                    }
                    None => {
                        warn!("Radio event stream ended");
                        break;
                    }
                },
                control = self.control_rx.recv() => match control {
                    Some(ClientControl::Reconnect) => {
                        self.machine.reconnect();
                        self.publish_status(false);
                    }
                    Some(ClientControl::Shutdown) | None => {
                        info!("Client shutting down");
                        break;
                    }
                },
                _ = poll.tick() => {
                    if self.machine.ensure_scanning() {
                        debug!("Poll found no connection, scan requested");
                        self.publish_status(false);
                    }
                }
            }
        }

        self.machine
    }

    fn publish_status(&self, notified: bool) {
        let mut status = self.status.write();
        status.phase = self.machine.phase();
        status.connection = self.machine.session().connection_handle();
        if notified {
            status.notifications_received += 1;
        }
    }
}
