//! Terminal status events.

use crate::capabilities::StatusSink;
use crate::motion::MotionState;
use crate::park::ParkStatus;
use crate::switch::Direction;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a drive cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The end-of-travel switch for the direction of motion engaged.
    LimitReached,
    /// The operator (or an automation client) stopped the motion.
    Aborted,
    /// The safety deadline expired before a limit switch engaged.
    Overrun,
    /// The stop command could not be delivered; the motor state is unknown.
    Unknown,
}

impl TerminalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalReason::LimitReached => "limit_reached",
            TerminalReason::Aborted => "aborted",
            TerminalReason::Overrun => "overrun",
            TerminalReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted on every terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: MotionState,
    pub park: ParkStatus,
    pub reason: TerminalReason,
    /// Direction of the drive cycle that ended, if one was outstanding.
    pub direction: Option<Direction>,
    /// At least one switch poll during the cycle went unanswered.
    pub degraded: bool,
    /// Number of unanswered polls during the cycle.
    pub unreachable_polls: u32,
    /// The stop command was delivered to the controller.
    pub stop_confirmed: bool,
    /// Motor on-time of the cycle in milliseconds.
    pub elapsed_ms: Option<u64>,
}

impl StatusEvent {
    pub fn new(state: MotionState, park: ParkStatus, reason: TerminalReason) -> Self {
        Self {
            state,
            park,
            reason,
            direction: None,
            degraded: false,
            unreachable_polls: 0,
            stop_confirmed: true,
            elapsed_ms: None,
        }
    }

    pub fn with_direction(mut self, direction: Option<Direction>) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_link_health(mut self, unreachable_polls: u32) -> Self {
        self.unreachable_polls = unreachable_polls;
        self.degraded = unreachable_polls > 0;
        self
    }

    pub fn with_stop_confirmed(mut self, confirmed: bool) -> Self {
        self.stop_confirmed = confirmed;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: Option<u64>) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// Publishes events on a tokio broadcast channel.
///
/// Sending with no live receivers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl StatusSink for BroadcastSink {
    fn emit(&self, event: &StatusEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(reason = %event.reason, "status event dropped, no subscribers");
        }
    }
}
