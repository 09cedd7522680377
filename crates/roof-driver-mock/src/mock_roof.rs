//! Simulated roll-off roof.

use crate::faults::{FaultScenario, FaultState};
use async_trait::async_trait;
use parking_lot::Mutex;
use roof_core::{ActuatorCommand, Connection, SwitchSnapshot, TransportError};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Distance from an end of travel at which the switch engages.
const SWITCH_BAND: f64 = 1e-6;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    #[default]
    Closed,
    Open,
    Between,
}

impl StartPosition {
    fn fraction(self) -> f64 {
        match self {
            StartPosition::Closed => 0.0,
            StartPosition::Open => 1.0,
            StartPosition::Between => 0.5,
        }
    }
}

/// Configuration for MockRoof
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MockRoofConfig {
    /// Full travel time in seconds (default: 12.0)
    #[serde(default = "default_travel_secs")]
    pub travel_secs: f64,
    #[serde(default)]
    pub start: StartPosition,
    /// Simulated round-trip delay per exchange in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub faults: Vec<FaultScenario>,
}

fn default_travel_secs() -> f64 {
    12.0
}

impl Default for MockRoofConfig {
    fn default() -> Self {
        Self {
            travel_secs: default_travel_secs(),
            start: StartPosition::default(),
            latency_ms: 0,
            faults: Vec::new(),
        }
    }
}

impl MockRoofConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.travel_secs.is_finite() || self.travel_secs <= 0.0 {
            return Err(format!(
                "mock travel_secs must be positive, got {}",
                self.travel_secs
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Simulation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    Stopped,
    Opening,
    Closing,
}

#[derive(Debug)]
struct RoofSim {
    /// 0.0 fully closed, 1.0 fully open
    position: f64,
    motor: Motor,
    updated: Instant,
    commands: Vec<String>,
}

impl RoofSim {
    fn advance(&mut self, now: Instant, travel: Duration) {
        let dt = now.saturating_duration_since(self.updated).as_secs_f64();
        self.updated = now;
        let step = dt / travel.as_secs_f64();
        self.position = match self.motor {
            Motor::Stopped => self.position,
            Motor::Opening => (self.position + step).min(1.0),
            Motor::Closing => (self.position - step).max(0.0),
        };
    }
}

/// Roof with two limit switches and a motor that keeps pushing against an
/// end stop until told to stop.
///
/// Uses `tokio::time::Instant`, so tests with paused time control travel.
pub struct MockRoof {
    travel: Duration,
    latency: Duration,
    sim: Mutex<RoofSim>,
    faults: Mutex<FaultState>,
}

impl MockRoof {
    pub fn new() -> Self {
        Self::with_config(MockRoofConfig::default())
    }

    pub fn with_config(config: MockRoofConfig) -> Self {
        let travel_secs = if config.travel_secs > 0.0 {
            config.travel_secs
        } else {
            default_travel_secs()
        };
        Self {
            travel: Duration::from_secs_f64(travel_secs),
            latency: Duration::from_millis(config.latency_ms),
            sim: Mutex::new(RoofSim {
                position: config.start.fraction(),
                motor: Motor::Stopped,
                updated: Instant::now(),
                commands: Vec::new(),
            }),
            faults: Mutex::new(FaultState::new(config.faults)),
        }
    }

    pub fn closed(travel: Duration) -> Self {
        Self::with_config(MockRoofConfig {
            travel_secs: travel.as_secs_f64(),
            ..MockRoofConfig::default()
        })
    }

    pub fn open(travel: Duration) -> Self {
        Self::with_config(MockRoofConfig {
            travel_secs: travel.as_secs_f64(),
            start: StartPosition::Open,
            ..MockRoofConfig::default()
        })
    }

    pub fn inject(&self, scenario: FaultScenario) {
        tracing::debug!(?scenario, "mock roof fault injected");
        self.faults.lock().push(scenario);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn active_faults(&self) -> Vec<FaultScenario> {
        self.faults.lock().active().to_vec()
    }

    pub fn position(&self) -> f64 {
        let mut sim = self.sim.lock();
        sim.advance(Instant::now(), self.travel);
        sim.position
    }

    /// Move the roof by hand (e.g. someone cranked it).
    pub fn set_position(&self, position: f64) {
        let mut sim = self.sim.lock();
        sim.advance(Instant::now(), self.travel);
        sim.position = position.clamp(0.0, 1.0);
    }

    pub fn motor(&self) -> Motor {
        self.sim.lock().motor
    }

    /// Every command text received, including rejected ones.
    pub fn commands(&self) -> Vec<String> {
        self.sim.lock().commands.clone()
    }

    pub fn command_count(&self, command: ActuatorCommand) -> usize {
        self.sim
            .lock()
            .commands
            .iter()
            .filter(|c| c.as_str() == command.as_wire())
            .count()
    }

    async fn exchange_delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockRoof {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockRoof {
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        self.exchange_delay().await;
        self.sim.lock().commands.push(command.to_string());

        let Some(parsed) = ActuatorCommand::from_wire(command) else {
            return Err(TransportError::unsupported(format!(
                "mock roof has no command {command:?}"
            )));
        };
        let ignore_motor = {
            let mut faults = self.faults.lock();
            faults.check_send(parsed)?;
            faults.motor_ignored()
        };

        let mut sim = self.sim.lock();
        sim.advance(Instant::now(), self.travel);
        sim.motor = match parsed {
            ActuatorCommand::Abort => Motor::Stopped,
            _ if ignore_motor => sim.motor,
            ActuatorCommand::Open => Motor::Opening,
            ActuatorCommand::Close => Motor::Closing,
        };
        tracing::trace!(command, position = sim.position, motor = ?sim.motor, "mock roof command");
        Ok(())
    }

    async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
        self.exchange_delay().await;
        let mut faults = self.faults.lock();
        faults.check_query()?;

        let position = {
            let mut sim = self.sim.lock();
            sim.advance(Instant::now(), self.travel);
            sim.position
        };
        let (open_engaged, closed_engaged) =
            faults.distort(position >= 1.0 - SWITCH_BAND, position <= SWITCH_BAND);
        Ok(SwitchSnapshot {
            open_engaged,
            closed_engaged,
        })
    }
}
