//! # roof_control
//!
//! Motion-safety controller for a roll-off observatory roof driven by a
//! remote microcontroller with two end-of-travel limit switches.
//!
//! The motion logic lives in `roof-core`; this crate adds the ambient
//! application layer:
//!
//! - [`config`]: figment-based configuration (`config/roof.toml` + `ROOF_*`)
//! - [`logging`]: tracing-subscriber setup
//! - [`interlock`]: flag-file interlocks from mount and weather tools
//! - [`sinks`]: park flag and status file outputs
//! - [`service`]: wiring configuration into a running [`roof_core::MotionRunner`]
//!
//! The `roofctl` binary is a thin CLI over [`service::RoofService`].

pub mod config;
pub mod error;
pub mod interlock;
pub mod logging;
pub mod service;
pub mod sinks;

pub use config::RoofConfig;
pub use error::{RoofError, RoofResult};
pub use service::RoofService;

pub use roof_core;
#[cfg(feature = "firmata")]
pub use roof_driver_firmata;
pub use roof_driver_mock;
