//! Actuator link.
//!
//! Sends directional motor commands. Delivery is fire-and-forget; only a
//! transport failure is reported back.

use crate::capabilities::Connection;
use crate::error::TransportError;
use crate::switch::Direction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Motor command understood by every connection adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorCommand {
    Open,
    Close,
    Abort,
}

impl ActuatorCommand {
    /// Command text handed to [`Connection::send_command`].
    pub fn as_wire(self) -> &'static str {
        match self {
            ActuatorCommand::Open => "OPEN",
            ActuatorCommand::Close => "CLOSE",
            ActuatorCommand::Abort => "ABORT",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        match text.trim() {
            "OPEN" => Some(ActuatorCommand::Open),
            "CLOSE" => Some(ActuatorCommand::Close),
            "ABORT" => Some(ActuatorCommand::Abort),
            _ => None,
        }
    }
}

impl From<Direction> for ActuatorCommand {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Open => ActuatorCommand::Open,
            Direction::Close => ActuatorCommand::Close,
        }
    }
}

pub struct ActuatorLink {
    connection: Arc<dyn Connection>,
}

impl ActuatorLink {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    #[instrument(skip(self), fields(command = command.as_wire()), err)]
    pub async fn send(&self, command: ActuatorCommand) -> Result<(), TransportError> {
        self.connection.send_command(command.as_wire()).await
    }

    /// Send `command`, trying up to `attempts` times.
    ///
    /// Returns the number of attempts used on success, or the last error.
    pub async fn send_with_retry(
        &self,
        command: ActuatorCommand,
        attempts: u32,
    ) -> Result<u32, TransportError> {
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.send(command).await {
                Ok(()) => return Ok(attempt),
                Err(err) => {
                    tracing::error!(
                        command = command.as_wire(),
                        attempt,
                        attempts,
                        error = %err,
                        "motor command not delivered"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| TransportError::io("command never attempted")))
    }
}
