//! Application error type.
//!
//! `RoofError` consolidates the failures the application layer can hit:
//!
//! - **`Config`**: figment could not load or parse the configuration.
//! - **`Configuration`**: the configuration parsed but is semantically wrong
//!   (zero poll interval, pin wiring without pins, ...). Caught by
//!   [`RoofConfig::validate`](crate::config::RoofConfig::validate).
//! - **`Io`**: file I/O for interlock flags and park state outputs.
//! - **`Transport`**: the controller link failed outside a motion cycle
//!   (inside one, failures are absorbed by the motion controller).
//! - **`Connect`**: the controller link could not be established.
//! - **`Rejected`**: a start request was refused by the motion controller.
//! - **`Service`**: the motion runner task is gone.
//! - **`FeatureNotEnabled`**: configuration asks for a driver that was not
//!   compiled in.

use roof_core::{Rejection, RunnerError, TransportError};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RoofResult<T> = std::result::Result<T, RoofError>;

#[derive(Error, Debug)]
pub enum RoofError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to connect to roof controller: {0:#}")]
    Connect(anyhow::Error),

    #[error("Motion rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Motion service error: {0}")]
    Service(#[from] RunnerError),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for RoofError {
    fn from(err: figment::Error) -> Self {
        RoofError::Config(Box::new(err))
    }
}
