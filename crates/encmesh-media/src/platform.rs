//! Host platform details resolved once at startup.

use std::path::{Path, PathBuf};

/// Platform-specific paths used when building encoder invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    null_sink: PathBuf,
}

impl Platform {
    /// Detect the running platform.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::unix()
        }
    }

    pub fn unix() -> Self {
        Self {
            null_sink: PathBuf::from("/dev/null"),
        }
    }

    pub fn windows() -> Self {
        Self {
            null_sink: PathBuf::from("NUL"),
        }
    }

    /// Output path that discards everything written to it.
    pub fn null_sink(&self) -> &Path {
        &self.null_sink
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::detect()
    }
}
