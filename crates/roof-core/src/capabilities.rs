//! Collaborator traits
//!
//! The motion controller never talks to hardware, weather stations or
//! operator UIs directly. It is handed three collaborators:
//!
//! - [`Connection`]: the request/response link to the remote controller
//! - [`Interlock`]: external conditions that forbid motion in one direction
//! - [`StatusSink`]: outward channel for terminal motion events
//!
//! Implementations for real hardware live in driver crates
//! (`roof-driver-firmata`), simulated ones in `roof-driver-mock`.
//!
//! # Contract
//!
//! - `Connection` methods are async and serialised by the implementation:
//!   only one exchange with the hardware is outstanding at a time.
//! - Every exchange has a bounded I/O timeout; on expiry it returns a
//!   [`TransportError`] with kind `Timeout`.
//! - `Interlock` and `StatusSink` are synchronous and must not block.

use crate::error::TransportError;
use crate::status::StatusEvent;
use crate::switch::SwitchSnapshot;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Capability: remote controller link
///
/// Adapters normalise their wire form (string commands, per-pin digital I/O)
/// into plain command text and a combined [`SwitchSnapshot`].
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a command such as `OPEN`, `CLOSE` or `ABORT`.
    ///
    /// Fire-and-forget: `Ok(())` means the bytes left the host, not that the
    /// controller acted on them.
    async fn send_command(&self, command: &str) -> Result<(), TransportError>;

    /// Read both limit switches in one exchange.
    async fn query_state(&self) -> Result<SwitchSnapshot, TransportError>;
}

#[async_trait]
impl<T: Connection + ?Sized> Connection for Arc<T> {
    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        (**self).send_command(command).await
    }

    async fn query_state(&self) -> Result<SwitchSnapshot, TransportError> {
        (**self).query_state().await
    }
}

/// Capability: motion interlocks
pub trait Interlock: Send + Sync {
    /// Closing is forbidden (e.g. the linked mount is not parked).
    fn is_close_locked(&self) -> bool;

    /// Opening is forbidden (e.g. rain or wind reported by a weather watcher).
    fn is_unsafe_to_open(&self) -> bool;
}

impl<T: Interlock + ?Sized> Interlock for Arc<T> {
    fn is_close_locked(&self) -> bool {
        (**self).is_close_locked()
    }

    fn is_unsafe_to_open(&self) -> bool {
        (**self).is_unsafe_to_open()
    }
}

/// Interlock with fixed, externally settable flags.
#[derive(Debug, Default)]
pub struct StaticInterlock {
    close_locked: AtomicBool,
    unsafe_to_open: AtomicBool,
}

impl StaticInterlock {
    /// Interlock that never forbids anything.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn new(close_locked: bool, unsafe_to_open: bool) -> Self {
        Self {
            close_locked: AtomicBool::new(close_locked),
            unsafe_to_open: AtomicBool::new(unsafe_to_open),
        }
    }

    pub fn set_close_locked(&self, locked: bool) {
        self.close_locked.store(locked, Ordering::SeqCst);
    }

    pub fn set_unsafe_to_open(&self, unsafe_to_open: bool) {
        self.unsafe_to_open.store(unsafe_to_open, Ordering::SeqCst);
    }
}

impl Interlock for StaticInterlock {
    fn is_close_locked(&self) -> bool {
        self.close_locked.load(Ordering::SeqCst)
    }

    fn is_unsafe_to_open(&self) -> bool {
        self.unsafe_to_open.load(Ordering::SeqCst)
    }
}

/// Capability: status output
///
/// Receives one event per terminal transition. Rendering, persistence and
/// transmission are the sink's business; a sink must swallow (and log) its
/// own failures.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}

impl<T: StatusSink + ?Sized> StatusSink for Arc<T> {
    fn emit(&self, event: &StatusEvent) {
        (**self).emit(event)
    }
}

/// Forwards every event to each contained sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn StatusSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutSink {
    fn emit(&self, event: &StatusEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
