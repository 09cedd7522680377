//! Park state outputs fed by terminal motion events.
//!
//! Sinks run on the motion runner task, so they do small synchronous file
//! writes and never fail the motion logic: errors are logged and dropped.

use roof_core::{ParkStatus, StatusEvent, StatusSink, TerminalReason};
use std::io;
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` via a sibling temp file and rename, so
/// readers never see a half-written file.
fn replace_file(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// =============================================================================
// ParkFlagFile
// =============================================================================

/// Flag file holding `parked` or `unparked`.
///
/// The file is removed when the park status is unknown so that no stale
/// flag outlives an uncertain stop.
#[derive(Debug, Clone)]
pub struct ParkFlagFile {
    path: PathBuf,
}

impl ParkFlagFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, park: ParkStatus) -> io::Result<()> {
        match park {
            ParkStatus::Parked => replace_file(&self.path, "parked\n"),
            ParkStatus::Unparked => replace_file(&self.path, "unparked\n"),
            ParkStatus::Unknown => remove_if_present(&self.path),
        }
    }
}

impl StatusSink for ParkFlagFile {
    fn emit(&self, event: &StatusEvent) {
        if let Err(e) = self.write(event.park) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to update park flag");
        }
    }
}

// =============================================================================
// StatusFile
// =============================================================================

/// Three-field status line: park state, shutter state, azimuth.
///
/// | park     | line    |
/// |----------|---------|
/// | Parked   | `1 0 0` |
/// | Unparked | `0 1 0` |
/// | Unknown  | `2 0 0` |
pub fn status_line(park: ParkStatus) -> &'static str {
    match park {
        ParkStatus::Parked => "1 0 0",
        ParkStatus::Unparked => "0 1 0",
        ParkStatus::Unknown => "2 0 0",
    }
}

#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, park: ParkStatus) -> io::Result<()> {
        replace_file(&self.path, status_line(park))
    }
}

impl StatusSink for StatusFile {
    fn emit(&self, event: &StatusEvent) {
        if let Err(e) = self.write(event.park) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to write status file");
        }
    }
}

// =============================================================================
// TracingSink
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: &StatusEvent) {
        let direction = event.direction.map(|d| d.as_str()).unwrap_or("none");
        if event.reason == TerminalReason::LimitReached && !event.degraded {
            tracing::info!(
                park = ?event.park,
                reason = %event.reason,
                direction,
                elapsed_ms = event.elapsed_ms,
                "roof motion finished"
            );
        } else {
            tracing::warn!(
                park = ?event.park,
                reason = %event.reason,
                direction,
                elapsed_ms = event.elapsed_ms,
                unreachable_polls = event.unreachable_polls,
                stop_confirmed = event.stop_confirmed,
                "roof motion ended abnormally"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roof_core::MotionState;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn event(park: ParkStatus, reason: TerminalReason) -> StatusEvent {
        StatusEvent::new(MotionState::Idle, park, reason)
    }

    #[test]
    fn park_flag_written_and_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roofstate.p");
        let sink = ParkFlagFile::new(&path);

        sink.emit(&event(ParkStatus::Parked, TerminalReason::LimitReached));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "parked\n");

        sink.emit(&event(ParkStatus::Unparked, TerminalReason::LimitReached));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "unparked\n");

        sink.emit(&event(ParkStatus::Unknown, TerminalReason::Overrun));
        assert!(!path.exists());
        // Removing an absent flag is fine.
        assert!(sink.write(ParkStatus::Unknown).is_ok());
    }

    #[test]
    fn status_file_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.txt");
        let sink = StatusFile::new(&path);

        for (park, line) in [
            (ParkStatus::Parked, "1 0 0"),
            (ParkStatus::Unparked, "0 1 0"),
            (ParkStatus::Unknown, "2 0 0"),
        ] {
            sink.emit(&event(park, TerminalReason::LimitReached));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), line);
        }
    }

    #[test]
    #[traced_test]
    fn write_failures_are_logged_not_raised() {
        let sink = StatusFile::new("/nonexistent-dir/status.txt");
        sink.emit(&event(ParkStatus::Parked, TerminalReason::LimitReached));
        assert!(logs_contain("failed to write status file"));
    }

    #[test]
    #[traced_test]
    fn tracing_sink_flags_abnormal_stops() {
        TracingSink.emit(&event(ParkStatus::Unknown, TerminalReason::Overrun));
        assert!(logs_contain("roof motion ended abnormally"));
    }
}
