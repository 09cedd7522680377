//! Roof sketch that speaks text commands over Firmata STRING_DATA.
//!
//! Protocol Overview:
//! - Host → board: `OPEN`, `CLOSE`, `ABORT`, `QUERY`, NUL-terminated
//! - Board → host (QUERY only): `OPEN`, `CLOSED`, `UNKNOWN`
//! - The sketch drives the relays and reads the limit switches itself

use crate::port::FirmataPort;
use crate::protocol::{self, FirmataMessage};
use async_trait::async_trait;
use roof_core::{Connection, SwitchSnapshot, TransportError};
use std::time::Duration;
use tracing::instrument;

pub const QUERY: &str = "QUERY";

/// Map a QUERY reply onto the two limit switches.
pub fn parse_state_reply(reply: &str) -> Result<SwitchSnapshot, TransportError> {
    match reply.trim() {
        "OPEN" => Ok(SwitchSnapshot::fully_open()),
        "CLOSED" => Ok(SwitchSnapshot::fully_closed()),
        "UNKNOWN" => Ok(SwitchSnapshot::between()),
        other => Err(TransportError::malformed(format!(
            "unexpected roof state reply: {other:?}"
        ))),
    }
}

/// The sketch reads commands as C strings.
fn encode_command(command: &str) -> Vec<u8> {
    protocol::encode_string(&format!("{command}\0"))
}

pub struct FirmataStringLink {
    port: FirmataPort,
    settle: Duration,
}

impl FirmataStringLink {
    /// `settle` is waited after every command so the sketch can act on it
    /// before the next request.
    pub fn new(port: FirmataPort, settle: Duration) -> Self {
        Self { port, settle }
    }

    pub fn port(&self) -> &FirmataPort {
        &self.port
    }
}

#[async_trait]
impl Connection for FirmataStringLink {
    #[instrument(skip(self), err)]
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        self.port.send(&encode_command(command)).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
        let reply = self
            .port
            .exchange(&encode_command(QUERY), |message| match message {
                FirmataMessage::StringData(text) => Some(text),
                _ => None,
            })
            .await?;
        parse_state_reply(&reply)
    }
}
