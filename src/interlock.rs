//! Interlocks backed by flag files.
//!
//! Other observatory tools signal conditions by creating files: the mount's
//! park policy drops a close-lock file while the telescope is not parked,
//! a weather watcher drops an unsafe flag while it rains. The controller
//! only checks for existence, so the contents are irrelevant.

use crate::config::InterlockConfig;
use roof_core::Interlock;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct FlagFileInterlock {
    close_lock_file: Option<PathBuf>,
    unsafe_flag_file: Option<PathBuf>,
}

impl FlagFileInterlock {
    pub fn new(close_lock_file: Option<PathBuf>, unsafe_flag_file: Option<PathBuf>) -> Self {
        Self {
            close_lock_file,
            unsafe_flag_file,
        }
    }

    pub fn from_config(config: &InterlockConfig) -> Self {
        Self::new(
            config.close_lock_file.clone(),
            config.unsafe_flag_file.clone(),
        )
    }

    fn flagged(path: Option<&Path>, what: &str) -> bool {
        let Some(path) = path else {
            return false;
        };
        let present = path.exists();
        if present {
            tracing::debug!(flag = %path.display(), what, "interlock flag present");
        }
        present
    }
}

impl Interlock for FlagFileInterlock {
    fn is_close_locked(&self) -> bool {
        Self::flagged(self.close_lock_file.as_deref(), "close locked")
    }

    fn is_unsafe_to_open(&self) -> bool {
        Self::flagged(self.unsafe_flag_file.as_deref(), "unsafe to open")
    }
}
