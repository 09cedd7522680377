//! Switch sensor adapter.
//!
//! Turns `Connection::query_state` into tri-state switch readings. A failed
//! exchange yields `Unreachable` for both switches; it is never folded into
//! `NotEngaged` here. Callers decide how to treat it.

use crate::capabilities::Connection;
use crate::error::TransportError;
use crate::switch::{LimitSwitch, LimitSwitchState, SwitchReading};
use std::sync::Arc;
use std::time::Duration;

pub struct SwitchSensor {
    connection: Arc<dyn Connection>,
    last: Option<LimitSwitchState>,
    last_error: Option<TransportError>,
}

impl SwitchSensor {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            last: None,
            last_error: None,
        }
    }

    /// Read both switches in one exchange.
    pub async fn read(&mut self) -> LimitSwitchState {
        let state = match self.connection.query_state().await {
            Ok(snapshot) => {
                self.last_error = None;
                LimitSwitchState::from(snapshot)
            }
            Err(err) => {
                tracing::warn!(error = %err, "limit switch query failed");
                self.last_error = Some(err);
                LimitSwitchState::unreachable()
            }
        };
        self.last = Some(state);
        state
    }

    /// Read both switches, giving up after `limit`.
    ///
    /// An exchange that outlives `limit` is dropped and reads as `Unreachable`.
    pub async fn read_within(&mut self, limit: Duration) -> LimitSwitchState {
        match tokio::time::timeout(limit, self.read()).await {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!(limit_ms = limit.as_millis() as u64, "limit switch query cut short");
                let state = LimitSwitchState::unreachable();
                self.last_error = Some(TransportError::timeout(format!(
                    "no switch reply within {} ms",
                    limit.as_millis()
                )));
                self.last = Some(state);
                state
            }
        }
    }

    /// Poll a single switch.
    pub async fn poll(&mut self, switch: LimitSwitch) -> SwitchReading {
        self.read().await.get(switch)
    }

    /// Result of the most recent read, if any.
    pub fn last(&self) -> Option<LimitSwitchState> {
        self.last
    }

    /// Error from the most recent read, cleared by the next successful one.
    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }
}
