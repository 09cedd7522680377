//! Serial port helpers for connection adapters.
//!
//! # Feature Flag
//!
//! [`open_serial_async`] requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! roof-core = { path = "../roof-core", features = ["serial"] }
//! ```
//!
//! The remaining items are plain tokio I/O and always available, so adapters
//! can be tested against `tokio::io::duplex` without a real port.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;

/// Anything that can stand in for a serial port.
///
/// Covers `tokio_serial::SerialStream`, `tokio::io::DuplexStream` and test
/// doubles implementing the async I/O traits.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between tasks; the mutex serialises exchanges.
///
/// Unbuffered: the Firmata framing is binary and decoded byte by byte.
pub type SharedPort = Arc<Mutex<DynSerial>>;

pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(port))
}

/// Open a serial port (8N1, no flow control) without blocking the runtime.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Read and discard whatever is immediately available.
///
/// Returns the number of bytes discarded. Stops at EOF, on an I/O error, or
/// when no data arrives within `timeout_ms`.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    timeout_ms: u64,
) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    total_discarded
}
