//! Configuration and construction of Firmata connections.

use crate::pin_link::{FirmataPinLink, PinConfig};
use crate::port::FirmataPort;
use crate::string_link::FirmataStringLink;
use anyhow::{anyhow, bail, Context, Result};
use roof_core::serial::{wrap_shared, DynSerial};
use roof_core::Connection;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Sketch name of the text-command roof controller.
pub const DEFAULT_FIRMWARE: &str = "SimpleDigitalFirmataRoofController";

/// How the roof hardware hangs off the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireForm {
    /// Sketch interprets OPEN/CLOSE/ABORT/QUERY strings.
    #[default]
    StringCommands,
    /// StandardFirmata, relays and switches on board pins.
    Pins,
}

fn default_baud_rate() -> u32 {
    57_600
}

fn default_io_timeout_ms() -> u64 {
    400
}

fn default_settle_ms() -> u64 {
    50
}

fn default_boot_delay_ms() -> u64 {
    2_000
}

/// Configuration for a Firmata-connected roof
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FirmataConfig {
    /// Serial port path (e.g., "/dev/ttyACM0")
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub wire: WireForm,
    /// Bound on every write and every request/response exchange
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Pause after each command before the next request
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Arduino boards reset when the port opens
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
    /// Text the reported sketch name must contain; empty skips the check.
    /// Defaults to [`DEFAULT_FIRMWARE`] for string commands.
    #[serde(default)]
    pub expected_firmware: Option<String>,
    /// Required for [`WireForm::Pins`]
    #[serde(default)]
    pub pins: Option<PinConfig>,
}

impl FirmataConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            wire: WireForm::default(),
            io_timeout_ms: default_io_timeout_ms(),
            settle_ms: default_settle_ms(),
            boot_delay_ms: default_boot_delay_ms(),
            expected_firmware: None,
            pins: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            bail!("firmata port must not be empty");
        }
        if self.baud_rate == 0 {
            bail!("firmata baud_rate must be positive");
        }
        if self.io_timeout_ms == 0 {
            bail!("firmata io_timeout_ms must be positive");
        }
        match (self.wire, &self.pins) {
            (WireForm::Pins, None) => bail!("wire = \"pins\" requires a [pins] table"),
            (WireForm::Pins, Some(pins)) => pins.validate().map_err(|e| anyhow!(e))?,
            (WireForm::StringCommands, _) => {}
        }
        Ok(())
    }

    /// Firmware name to insist on, if any.
    pub fn firmware_check(&self) -> Option<&str> {
        match (&self.expected_firmware, self.wire) {
            (Some(name), _) if name.is_empty() => None,
            (Some(name), _) => Some(name),
            (None, WireForm::StringCommands) => Some(DEFAULT_FIRMWARE),
            (None, WireForm::Pins) => None,
        }
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Open the configured serial port and build the connection.
pub async fn connect(cfg: &FirmataConfig) -> Result<Arc<dyn Connection>> {
    cfg.validate()?;
    let stream =
        roof_core::serial::open_serial_async(&cfg.port, cfg.baud_rate, "Firmata roof controller")
            .await?;
    if cfg.boot_delay_ms > 0 {
        tracing::debug!(delay_ms = cfg.boot_delay_ms, "waiting for board reset");
        tokio::time::sleep(Duration::from_millis(cfg.boot_delay_ms)).await;
    }
    connect_with_port(Box::new(stream), cfg).await
}

/// Build the connection over an already open port.
///
/// Verifies the firmware name and, for pin wiring, configures the pins and
/// releases both relays.
pub async fn connect_with_port(io: DynSerial, cfg: &FirmataConfig) -> Result<Arc<dyn Connection>> {
    cfg.validate()?;
    let port = FirmataPort::new(wrap_shared(io), cfg.io_timeout());

    if let Some(expected) = cfg.firmware_check() {
        let info = port
            .query_firmware()
            .await
            .context("Firmata board did not report its firmware")?;
        if !info.matches(expected) {
            bail!(
                "unexpected firmware on {}: {:?} (expected {:?})",
                cfg.port,
                info.name,
                expected
            );
        }
        tracing::info!(
            port = %cfg.port,
            firmware = %info.name,
            version = format!("{}.{}", info.major, info.minor),
            "Firmata board identified"
        );
    }

    match cfg.wire {
        WireForm::StringCommands => Ok(Arc::new(FirmataStringLink::new(port, cfg.settle()))),
        WireForm::Pins => {
            let pins = cfg
                .pins
                .clone()
                .ok_or_else(|| anyhow!("pin wiring requires a [pins] table"))?;
            let link = FirmataPinLink::new(port, pins, cfg.settle());
            link.configure()
                .await
                .context("failed to configure roof pins")?;
            Ok(Arc::new(link))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, FirmataDecoder, FirmataMessage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn answer_firmware(mut host: DuplexStream, name: &'static str) -> DuplexStream {
        let mut decoder = FirmataDecoder::new();
        let mut buf = [0u8; 64];
        loop {
            let n = host.read(&mut buf).await.unwrap();
            if decoder.feed(&buf[..n]).iter().any(|m| {
                matches!(m, FirmataMessage::Sysex { command: protocol::REPORT_FIRMWARE, .. })
            }) {
                break;
            }
        }
        host.write_all(&protocol::firmware_report(2, 5, name)).await.unwrap();
        host
    }

    #[test]
    fn validate_config() {
        let valid: FirmataConfig = toml::from_str(r#"port = "/dev/ttyACM0""#).unwrap();
        assert!(valid.validate().is_ok());
        assert_eq!(valid.baud_rate, 57_600);
        assert_eq!(valid.wire, WireForm::StringCommands);
        assert_eq!(valid.firmware_check(), Some(DEFAULT_FIRMWARE));

        let missing_pins: FirmataConfig = toml::from_str(
            r#"
            port = "/dev/ttyACM0"
            wire = "pins"
            "#,
        )
        .unwrap();
        assert!(missing_pins.validate().is_err());

        let empty_port = FirmataConfig::new(" ");
        assert!(empty_port.validate().is_err());
    }

    #[test]
    fn empty_expected_firmware_skips_check() {
        let cfg = FirmataConfig {
            expected_firmware: Some(String::new()),
            ..FirmataConfig::new("/dev/null")
        };
        assert_eq!(cfg.firmware_check(), None);
    }

    #[tokio::test]
    async fn connect_accepts_expected_firmware() {
        let (host, device) = tokio::io::duplex(256);
        let board = tokio::spawn(answer_firmware(
            host,
            "SimpleDigitalFirmataRoofController.ino",
        ));
        let cfg = FirmataConfig::new("test");
        assert!(connect_with_port(Box::new(device), &cfg).await.is_ok());
        drop(board.await.unwrap());
    }

    #[tokio::test]
    async fn connect_rejects_other_firmware() {
        let (host, device) = tokio::io::duplex(256);
        let board = tokio::spawn(answer_firmware(host, "StandardFirmata.ino"));
        let cfg = FirmataConfig::new("test");
        let err = connect_with_port(Box::new(device), &cfg).await.err().unwrap();
        assert!(err.to_string().contains("unexpected firmware"));
        drop(board.await.unwrap());
    }
}
