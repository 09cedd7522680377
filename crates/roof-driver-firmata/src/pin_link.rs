//! Roof wired straight to board pins running StandardFirmata.
//!
//! Two relays drive the motor (one per direction), two inputs read the
//! limit switches. The host owns the relay logic:
//!
//! | command | open relay | close relay |
//! |---------|------------|-------------|
//! | OPEN    | on         | off         |
//! | CLOSE   | off        | on          |
//! | ABORT   | off        | off         |
//!
//! The inactive relay is always released before the active one is energised.

use crate::port::FirmataPort;
use crate::protocol::{self, FirmataMessage, PinMode};
use async_trait::async_trait;
use roof_core::{ActuatorCommand, Connection, SwitchSnapshot, TransportError};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Highest pin addressable by the 7-bit pin commands.
const MAX_PIN: u8 = 127;

fn default_true() -> bool {
    true
}

/// Pin assignment for [`FirmataPinLink`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinConfig {
    pub open_relay: u8,
    pub close_relay: u8,
    pub open_limit: u8,
    pub closed_limit: u8,
    /// Limit switches pull the input to ground when engaged (inputs use
    /// the internal pull-up).
    #[serde(default = "default_true")]
    pub limit_active_low: bool,
    /// Relay board energises on a low output.
    #[serde(default)]
    pub relay_active_low: bool,
}

impl PinConfig {
    pub fn validate(&self) -> Result<(), String> {
        let pins = [
            ("open_relay", self.open_relay),
            ("close_relay", self.close_relay),
            ("open_limit", self.open_limit),
            ("closed_limit", self.closed_limit),
        ];
        for (name, pin) in pins {
            if pin > MAX_PIN {
                return Err(format!("{name} pin {pin} out of range (0-{MAX_PIN})"));
            }
        }
        for (i, (a_name, a)) in pins.iter().enumerate() {
            for (b_name, b) in &pins[i + 1..] {
                if a == b {
                    return Err(format!("{a_name} and {b_name} share pin {a}"));
                }
            }
        }
        Ok(())
    }

    fn relay_level(&self, energised: bool) -> bool {
        energised != self.relay_active_low
    }

    fn limit_engaged(&self, level: bool) -> bool {
        level != self.limit_active_low
    }
}

fn port_of(pin: u8) -> u8 {
    pin / 8
}

fn pin_level(port_value: u16, pin: u8) -> bool {
    (port_value >> (pin % 8)) & 1 == 1
}

pub struct FirmataPinLink {
    port: FirmataPort,
    pins: PinConfig,
    settle: Duration,
}

impl FirmataPinLink {
    pub fn new(port: FirmataPort, pins: PinConfig, settle: Duration) -> Self {
        Self { port, pins, settle }
    }

    pub fn pins(&self) -> &PinConfig {
        &self.pins
    }

    /// Set pin modes and release both relays.
    #[instrument(skip(self), err)]
    pub async fn configure(&self) -> Result<(), TransportError> {
        let limit_mode = if self.pins.limit_active_low {
            PinMode::InputPullup
        } else {
            PinMode::Input
        };
        let released = self.pins.relay_level(false);

        let mut frame = Vec::with_capacity(24);
        for relay in [self.pins.open_relay, self.pins.close_relay] {
            frame.extend_from_slice(&protocol::set_digital_pin_value(relay, released));
            frame.extend_from_slice(&protocol::set_pin_mode(relay, PinMode::Output));
        }
        for limit in [self.pins.open_limit, self.pins.closed_limit] {
            frame.extend_from_slice(&protocol::set_pin_mode(limit, limit_mode));
        }
        self.port.send(&frame).await
    }

    fn relay_frame(&self, open: bool, close: bool) -> Vec<u8> {
        let (first, second) = if open {
            ((self.pins.close_relay, close), (self.pins.open_relay, open))
        } else {
            ((self.pins.open_relay, open), (self.pins.close_relay, close))
        };
        let mut frame = Vec::with_capacity(6);
        for (pin, energised) in [first, second] {
            frame.extend_from_slice(&protocol::set_digital_pin_value(
                pin,
                self.pins.relay_level(energised),
            ));
        }
        frame
    }

    async fn read_port(&self, port: u8) -> Result<u16, TransportError> {
        // StandardFirmata answers REPORT_DIGITAL with the current port value.
        self.port
            .exchange(&protocol::report_digital(port, true), |message| match message {
                FirmataMessage::DigitalPort { port: p, value } if p == port => Some(value),
                _ => None,
            })
            .await
    }
}

#[async_trait]
impl Connection for FirmataPinLink {
    #[instrument(skip(self), err)]
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        let frame = match ActuatorCommand::from_wire(command) {
            Some(ActuatorCommand::Open) => self.relay_frame(true, false),
            Some(ActuatorCommand::Close) => self.relay_frame(false, true),
            Some(ActuatorCommand::Abort) => self.relay_frame(false, false),
            None => {
                return Err(TransportError::unsupported(format!(
                    "pin wiring has no command {command:?}"
                )))
            }
        };
        self.port.send(&frame).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
        let open_port = port_of(self.pins.open_limit);
        let closed_port = port_of(self.pins.closed_limit);

        let open_value = self.read_port(open_port).await?;
        let closed_value = if closed_port == open_port {
            open_value
        } else {
            self.read_port(closed_port).await?
        };

        Ok(SwitchSnapshot {
            open_engaged: self
                .pins
                .limit_engaged(pin_level(open_value, self.pins.open_limit)),
            closed_engaged: self
                .pins
                .limit_engaged(pin_level(closed_value, self.pins.closed_limit)),
        })
    }
}
