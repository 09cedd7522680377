//! Park reconciliation.
//!
//! The park status is never stored and updated incrementally; it is
//! recomputed from the last switch reading and the last motion outcome every
//! time it is needed, so it cannot drift from the sensors it summarises.

use crate::switch::{Direction, LimitSwitchState};
use serde::{Deserialize, Serialize};

/// Externally visible summary of the roof position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkStatus {
    /// Fully closed.
    Parked,
    /// Fully open.
    Unparked,
    /// Somewhere in between, or the sensors disagree.
    #[default]
    Unknown,
}

impl ParkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParkStatus::Parked => "parked",
            ParkStatus::Unparked => "unparked",
            ParkStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ParkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the most recent drive cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionOutcome {
    /// No drive cycle has completed since start-up.
    #[default]
    None,
    /// Stopped because the switch for `Direction` engaged.
    LimitReached(Direction),
    Aborted,
    Overrun,
    /// The stop command was never confirmed delivered.
    StopUnconfirmed,
}

/// Derive the park status from the last reading and outcome.
pub fn reconcile(switches: &LimitSwitchState, outcome: MotionOutcome) -> ParkStatus {
    if outcome == MotionOutcome::StopUnconfirmed || switches.is_double_positive() {
        return ParkStatus::Unknown;
    }

    // A limit stop must agree with the switches it was triggered by.
    if let MotionOutcome::LimitReached(direction) = outcome {
        if !switches.is_at_limit(direction) {
            return ParkStatus::Unknown;
        }
    }

    if switches.is_fully_closed() {
        ParkStatus::Parked
    } else if switches.is_fully_open() {
        ParkStatus::Unparked
    } else {
        ParkStatus::Unknown
    }
}
