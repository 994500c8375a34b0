//! Status indicator capability.
//!
//! The client only ever tells the indicator whether it is searching or
//! connected. What that looks like (an LED, a log line, nothing) is up to
//! the implementation.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Narrow, fire-and-forget status signal sink.
#[cfg_attr(test, mockall::automock)]
pub trait Indicator {
    /// The client is looking for the peripheral.
    fn set_searching(&mut self);

    /// The client holds a link to the peripheral.
    fn set_connected(&mut self);
}

/// Last state signalled to an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndicatorState {
    /// Nothing signalled yet.
    #[default]
    Off,
    /// Searching for the peripheral.
    Searching,
    /// Connected to the peripheral.
    Connected,
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Searching => write!(f, "searching"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Indicator that ignores every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn set_searching(&mut self) {}

    fn set_connected(&mut self) {}
}

/// Indicator that reports signals as log lines.
#[derive(Debug, Clone, Default)]
pub struct LogIndicator {
    state: Arc<RwLock<IndicatorState>>,
}

impl LogIndicator {
    /// Create a new log indicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the last signalled state.
    ///
    /// The returned handle stays valid after the indicator has been moved
    /// into a client.
    pub fn state_handle(&self) -> Arc<RwLock<IndicatorState>> {
        self.state.clone()
    }

    /// Last signalled state.
    pub fn state(&self) -> IndicatorState {
        *self.state.read()
    }

    fn set(&self, new_state: IndicatorState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            info!("Indicator: {} -> {}", old_state, new_state);
        }
    }
}

impl Indicator for LogIndicator {
    fn set_searching(&mut self) {
        self.set(IndicatorState::Searching);
    }

    fn set_connected(&mut self) {
        self.set(IndicatorState::Connected);
    }
}

impl<I: Indicator + ?Sized> Indicator for Box<I> {
    fn set_searching(&mut self) {
        (**self).set_searching();
    }

    fn set_connected(&mut self) {
        (**self).set_connected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_indicator_tracks_state() {
        let mut indicator = LogIndicator::new();
        let handle = indicator.state_handle();
        assert_eq!(indicator.state(), IndicatorState::Off);

        indicator.set_searching();
        assert_eq!(*handle.read(), IndicatorState::Searching);

        indicator.set_connected();
        assert_eq!(indicator.state(), IndicatorState::Connected);
    }

    #[test]
    fn test_boxed_indicator_forwards() {
        let mut mock = MockIndicator::new();
        mock.expect_set_searching().times(1).return_const(());
        mock.expect_set_connected().times(1).return_const(());

        let mut boxed: Box<dyn Indicator> = Box::new(mock);
        boxed.set_searching();
        boxed.set_connected();
    }

    #[test]
    fn test_indicator_state_display() {
        assert_eq!(IndicatorState::Searching.to_string(), "searching");
        assert_eq!(IndicatorState::default(), IndicatorState::Off);
    }
}
