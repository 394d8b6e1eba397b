//! Session counters and connection history

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of disconnections kept in history
const MAX_DISCONNECTIONS: usize = 100;

/// One loss of an open connection
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnection {
    /// When the socket closed
    pub timestamp: DateTime<Utc>,
    /// How long the connection had been open, in milliseconds
    pub uptime_ms: u64,
    /// Reconnection delay scheduled after this loss
    pub retry_in_ms: u64,
}

/// Counters maintained by [`crate::Session`]
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Binary and text frames received on any socket
    pub frames_received: u64,
    /// Frames that produced no event
    pub frames_dropped: u64,
    /// Events handed to the bus
    pub events_dispatched: u64,
    /// Listener invocations that panicked
    pub listener_failures: u64,
    /// Sockets opened by the backoff loop
    pub reconnect_attempts: u64,
    /// Last transition to open
    pub last_open: Option<DateTime<Utc>>,
    /// Last loss of an open connection
    pub last_close: Option<DateTime<Utc>>,
    disconnections: VecDeque<Disconnection>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_open(&mut self) {
        self.last_open = Some(Utc::now());
    }

    /// Record the loss of an open connection
    ///
    /// # Arguments
    /// * `retry_in_ms` - Backoff delay scheduled for the next attempt
    pub(crate) fn record_disconnection(&mut self, retry_in_ms: u64) {
        let now = Utc::now();
        let uptime_ms = self
            .last_open
            .map(|opened| (now - opened).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.last_close = Some(now);

        if self.disconnections.len() >= MAX_DISCONNECTIONS {
            self.disconnections.pop_front();
        }
        self.disconnections.push_back(Disconnection {
            timestamp: now,
            uptime_ms,
            retry_in_ms,
        });
    }

    /// Disconnections, oldest first
    pub fn disconnections(&self) -> &VecDeque<Disconnection> {
        &self.disconnections
    }

    /// Fraction of received frames that were dropped
    pub fn drop_rate(&self) -> f64 {
        if self.frames_received == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / self.frames_received as f64
        }
    }
}
