//! Fault injection for the simulated roof.
//!
//! Scenarios can be loaded from configuration or injected while a test is
//! running. Counted scenarios expire once used up.

use roof_core::{ActuatorCommand, LimitSwitch, TransportError};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultScenario {
    /// The next `count` queries time out
    UnreachableQueries { count: u32 },
    /// The next `count` sends fail; restricted to one command when set
    FailingSends {
        count: u32,
        #[serde(default)]
        command: Option<ActuatorCommand>,
    },
    /// One switch reports a fixed value regardless of position
    StuckSwitch { switch: LimitSwitch, engaged: bool },
    /// Both switches report engaged
    DoublePositive,
    /// Commands are accepted but the motor never runs
    IgnoreMotor,
    /// Every exchange fails as if the cable were pulled
    Disconnected,
}

#[derive(Debug, Default)]
pub(crate) struct FaultState {
    scenarios: Vec<FaultScenario>,
}

impl FaultState {
    pub(crate) fn new(scenarios: Vec<FaultScenario>) -> Self {
        Self { scenarios }
    }

    pub(crate) fn push(&mut self, scenario: FaultScenario) {
        self.scenarios.push(scenario);
    }

    pub(crate) fn clear(&mut self) {
        self.scenarios.clear();
    }

    pub(crate) fn active(&self) -> &[FaultScenario] {
        &self.scenarios
    }

    fn disconnected(&self) -> Result<(), TransportError> {
        if self.scenarios.contains(&FaultScenario::Disconnected) {
            return Err(TransportError::disconnected("simulated link is down"));
        }
        Ok(())
    }

    pub(crate) fn check_query(&mut self) -> Result<(), TransportError> {
        self.disconnected()?;
        if consume(&mut self.scenarios, |s| {
            matches!(s, FaultScenario::UnreachableQueries { .. })
        }) {
            return Err(TransportError::timeout("simulated query timeout"));
        }
        Ok(())
    }

    pub(crate) fn check_send(&mut self, command: ActuatorCommand) -> Result<(), TransportError> {
        self.disconnected()?;
        if consume(&mut self.scenarios, |s| match s {
            FaultScenario::FailingSends { command: only, .. } => {
                only.map_or(true, |only| only == command)
            }
            _ => false,
        }) {
            return Err(TransportError::io(format!(
                "simulated write failure for {}",
                command.as_wire()
            )));
        }
        Ok(())
    }

    pub(crate) fn motor_ignored(&self) -> bool {
        self.scenarios.contains(&FaultScenario::IgnoreMotor)
    }

    /// Apply switch faults to a physical reading.
    pub(crate) fn distort(&self, mut open: bool, mut closed: bool) -> (bool, bool) {
        for scenario in &self.scenarios {
            match scenario {
                FaultScenario::StuckSwitch {
                    switch: LimitSwitch::OpenEnd,
                    engaged,
                } => open = *engaged,
                FaultScenario::StuckSwitch {
                    switch: LimitSwitch::ClosedEnd,
                    engaged,
                } => closed = *engaged,
                FaultScenario::DoublePositive => {
                    open = true;
                    closed = true;
                }
                _ => {}
            }
        }
        (open, closed)
    }
}

/// Decrement the first counted scenario matching `pred`, removing it at zero.
fn consume(scenarios: &mut Vec<FaultScenario>, pred: impl Fn(&FaultScenario) -> bool) -> bool {
    let Some(idx) = scenarios.iter().position(|s| pred(s)) else {
        return false;
    };
    let exhausted = match &mut scenarios[idx] {
        FaultScenario::UnreachableQueries { count } | FaultScenario::FailingSends { count, .. } => {
            *count = count.saturating_sub(1);
            *count == 0
        }
        _ => false,
    };
    if exhausted {
        scenarios.remove(idx);
    }
    true
}
