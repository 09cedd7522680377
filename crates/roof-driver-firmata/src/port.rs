//! Request/response plumbing over a shared serial port speaking Firmata.

use crate::protocol::{self, FirmataDecoder, FirmataMessage};
use parking_lot::Mutex;
use roof_core::serial::{drain_serial_buffer, SharedPort};
use roof_core::TransportError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Window used to discard stale board output before a request.
const STALE_DRAIN_MS: u64 = 5;

/// Identity reported by the sketch on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    pub name: String,
}

impl FirmwareInfo {
    /// Boards report the sketch file name, so `Foo.ino` matches `Foo`.
    pub fn matches(&self, expected: &str) -> bool {
        self.name.contains(expected)
    }
}

pub struct FirmataPort {
    port: SharedPort,
    decoder: Mutex<FirmataDecoder>,
    timeout: Duration,
}

impl FirmataPort {
    pub fn new(port: SharedPort, timeout: Duration) -> Self {
        Self {
            port,
            decoder: Mutex::new(FirmataDecoder::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write one or more frames that expect no reply.
    pub async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut port = self.port.lock().await;
        tokio::time::timeout(self.timeout, async {
            port.write_all(frame).await?;
            port.flush().await
        })
        .await
        .map_err(|_| TransportError::timeout("write to Firmata board timed out"))??;
        Ok(())
    }

    /// Write `request`, then decode board output until `accept` yields a value.
    ///
    /// Messages `accept` rejects are skipped. The whole exchange, including
    /// the write, is bounded by the port timeout.
    pub async fn exchange<T, F>(&self, request: &[u8], mut accept: F) -> Result<T, TransportError>
    where
        F: FnMut(FirmataMessage) -> Option<T> + Send,
        T: Send,
    {
        let mut port = self.port.lock().await;

        let stale = drain_serial_buffer(&mut *port, STALE_DRAIN_MS).await;
        if stale > 0 {
            tracing::trace!(bytes = stale, "discarded stale board output");
        }
        self.decoder.lock().reset();

        let exchange = async {
            port.write_all(request).await?;
            port.flush().await?;

            let mut buf = [0u8; 64];
            loop {
                let n = port.read(&mut buf).await?;
                if n == 0 {
                    return Err(TransportError::disconnected("Firmata board closed the port"));
                }
                let messages = self.decoder.lock().feed(&buf[..n]);
                for message in messages {
                    tracing::trace!(?message, "board message");
                    if let Some(value) = accept(message) {
                        return Ok(value);
                    }
                }
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::timeout("no reply from Firmata board"))?
    }

    /// Ask the board which sketch it runs.
    pub async fn query_firmware(&self) -> Result<FirmwareInfo, TransportError> {
        self.exchange(&protocol::report_firmware_request(), |message| match message {
            FirmataMessage::FirmwareReport { major, minor, name } => {
                Some(FirmwareInfo { major, minor, name })
            }
            _ => None,
        })
        .await
    }
}
