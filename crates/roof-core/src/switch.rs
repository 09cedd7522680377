//! Limit switch types.
//!
//! The roof has exactly two binary sensors, one at each end of travel. The
//! wire protocol delivers both in a single [`SwitchSnapshot`]; the core works
//! with [`LimitSwitchState`], which additionally remembers when a read failed.

use serde::{Deserialize, Serialize};

/// Direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    /// The end-of-travel switch that terminates motion in this direction.
    pub fn limit(self) -> LimitSwitch {
        match self {
            Direction::Open => LimitSwitch::OpenEnd,
            Direction::Close => LimitSwitch::ClosedEnd,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Open => "open",
            Direction::Close => "close",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two end-of-travel switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSwitch {
    /// Engaged when the roof is fully open.
    OpenEnd,
    /// Engaged when the roof is fully closed.
    ClosedEnd,
}

/// Result of polling a single switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReading {
    Engaged,
    NotEngaged,
    /// The controller did not answer, or answered with garbage.
    ///
    /// Never the same thing as `NotEngaged`.
    Unreachable,
}

impl SwitchReading {
    pub fn from_engaged(engaged: bool) -> Self {
        if engaged {
            SwitchReading::Engaged
        } else {
            SwitchReading::NotEngaged
        }
    }

    pub fn is_engaged(self) -> bool {
        self == SwitchReading::Engaged
    }

    pub fn is_unreachable(self) -> bool {
        self == SwitchReading::Unreachable
    }
}

/// Both switch states from one exchange with the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchSnapshot {
    pub open_engaged: bool,
    pub closed_engaged: bool,
}

impl SwitchSnapshot {
    pub fn fully_open() -> Self {
        Self {
            open_engaged: true,
            closed_engaged: false,
        }
    }

    pub fn fully_closed() -> Self {
        Self {
            open_engaged: false,
            closed_engaged: true,
        }
    }

    pub fn between() -> Self {
        Self::default()
    }
}

/// Last known reading of both switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSwitchState {
    pub open: SwitchReading,
    pub closed: SwitchReading,
}

impl LimitSwitchState {
    /// State after a failed exchange: both switches unreachable.
    pub fn unreachable() -> Self {
        Self {
            open: SwitchReading::Unreachable,
            closed: SwitchReading::Unreachable,
        }
    }

    pub fn get(&self, switch: LimitSwitch) -> SwitchReading {
        match switch {
            LimitSwitch::OpenEnd => self.open,
            LimitSwitch::ClosedEnd => self.closed,
        }
    }

    /// Both switches report engaged at once, which the hardware cannot do.
    pub fn is_double_positive(&self) -> bool {
        self.open.is_engaged() && self.closed.is_engaged()
    }

    pub fn any_unreachable(&self) -> bool {
        self.open.is_unreachable() || self.closed.is_unreachable()
    }

    /// Fully open: open switch engaged and the closed switch not.
    pub fn is_fully_open(&self) -> bool {
        self.open.is_engaged() && !self.closed.is_engaged()
    }

    /// Fully closed: closed switch engaged and the open switch not.
    pub fn is_fully_closed(&self) -> bool {
        self.closed.is_engaged() && !self.open.is_engaged()
    }

    /// True when the roof is unambiguously at the end of travel for `direction`.
    pub fn is_at_limit(&self, direction: Direction) -> bool {
        match direction {
            Direction::Open => self.is_fully_open(),
            Direction::Close => self.is_fully_closed(),
        }
    }
}

impl From<SwitchSnapshot> for LimitSwitchState {
    fn from(snapshot: SwitchSnapshot) -> Self {
        Self {
            open: SwitchReading::from_engaged(snapshot.open_engaged),
            closed: SwitchReading::from_engaged(snapshot.closed_engaged),
        }
    }
}
