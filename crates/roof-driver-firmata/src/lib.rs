//! Firmata connection adapters for the roll-off roof.
//!
//! Two wirings are supported:
//!
//! - [`FirmataStringLink`]: a sketch that understands text commands
//!   (`OPEN`, `CLOSE`, `ABORT`, `QUERY`) sent as STRING_DATA sysex
//! - [`FirmataPinLink`]: StandardFirmata with relays and limit switches on
//!   plain digital pins
//!
//! Both implement [`roof_core::Connection`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use roof_driver_firmata::{connect, FirmataConfig};
//!
//! let link = connect(&FirmataConfig::new("/dev/ttyACM0")).await?;
//! let snapshot = link.query_state().await?;
//! ```

pub mod config;
pub mod pin_link;
pub mod port;
pub mod protocol;
pub mod string_link;

pub use config::{connect, connect_with_port, FirmataConfig, WireForm, DEFAULT_FIRMWARE};
pub use pin_link::{FirmataPinLink, PinConfig};
pub use port::{FirmataPort, FirmwareInfo};
pub use string_link::FirmataStringLink;
