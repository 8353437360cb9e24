use std::{fmt::Display, time::Duration};

use common::protocol::{Reading, SensorKind};
use tokio::time::Instant;

/// What subscribers of a sensor kind observe. Only the poller mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub kind: SensorKind,

    /// Interval the kind is currently polled at.
    pub interval: Duration,

    /// Last successfully decoded value, kept across failed polls.
    pub last_value: Option<Reading>,

    /// When `last_value` was read.
    pub last_updated: Option<Instant>,

    /// Set when the most recent poll failed, cleared by the next success.
    pub stale: bool,

    pub consecutive_failures: u32,
}

impl PollSnapshot {
    pub fn new(kind: SensorKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            last_value: None,
            last_updated: None,
            stale: false,
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self, reading: Reading, at: Instant) {
        self.last_value = Some(reading);
        self.last_updated = Some(at);
        self.stale = false;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.stale = true;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

impl Display for PollSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last_value {
            Some(reading) => write!(
                f,
                "<Snapshot {} | value:{}, stale:{}, failures:{}>",
                self.kind, reading, self.stale, self.consecutive_failures
            ),
            None => write!(
                f,
                "<Snapshot {} | no value, stale:{}, failures:{}>",
                self.kind, self.stale, self.consecutive_failures
            ),
        }
    }
}
