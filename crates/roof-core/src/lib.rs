//! `roof-core`
//!
//! Motion-safety core for a single-axis, motor-driven observatory roof with
//! two end-of-travel limit switches and no position encoder.
//!
//! The crate decides when motion may start, polls the limit switches while
//! the motor runs, bounds motor on-time with a safety deadline, and makes
//! sure the motor is told to stop on every exit path. Hardware, interlocks
//! and status output are injected as collaborators; see [`capabilities`].
//!
//! ## Key Types
//!
//! - [`MotionController`]: the drive-cycle state machine
//! - [`MotionRunner`] / [`MotionHandle`]: task that ticks the controller
//! - [`SwitchSensor`] / [`ActuatorLink`]: adapters over a [`Connection`]
//! - [`reconcile`]: pure park-status derivation
//!
//! ## Example
//!
//! ```rust,ignore
//! use roof_core::{MotionController, MotionConfig, MotionRunner, StaticInterlock, BroadcastSink};
//!
//! let sink = BroadcastSink::new(16);
//! let controller = MotionController::new(
//!     connection,
//!     Arc::new(StaticInterlock::permissive()),
//!     Arc::new(sink.clone()),
//!     MotionConfig::default(),
//! );
//! let (handle, _task) = MotionRunner::spawn(controller, DEFAULT_TICK_INTERVAL);
//! handle.close().await??;
//! let event = sink.subscribe().recv().await?;
//! ```

pub mod actuator;
pub mod capabilities;
pub mod error;
pub mod motion;
pub mod park;
pub mod runner;
pub mod sensor;
pub mod serial;
pub mod status;
pub mod switch;

pub use actuator::{ActuatorCommand, ActuatorLink};
pub use capabilities::{Connection, FanoutSink, Interlock, StaticInterlock, StatusSink};
pub use error::{Rejection, TransportError, TransportErrorKind};
pub use motion::{
    MotionConfig, MotionController, MotionRequest, MotionState, StartOutcome, TickOutcome,
    DEFAULT_DEADLINE, DEFAULT_STOP_RETRIES,
};
pub use park::{reconcile, MotionOutcome, ParkStatus};
pub use runner::{
    ControllerSnapshot, MotionHandle, MotionRunner, RunnerError, DEFAULT_TICK_INTERVAL,
};
pub use sensor::SwitchSensor;
pub use status::{BroadcastSink, StatusEvent, TerminalReason};
pub use switch::{Direction, LimitSwitch, LimitSwitchState, SwitchReading, SwitchSnapshot};
