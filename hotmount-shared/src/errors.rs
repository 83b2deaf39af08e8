//! Error types for the guest storage core.
//!
//! Every variant carries enough context (device name, paths, errno) for the
//! caller to log it meaningfully. Nothing in the core is fatal to the agent
//! process; all failures surface as ordinary results.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

/// Result alias used across the workspace.
pub type HotmountResult<T> = Result<T, HotmountError>;

/// Errors raised by the device-attach and mount subsystem.
#[derive(Debug, Error)]
pub enum HotmountError {
    /// Mount source could not be resolved through symlinks.
    #[error("could not resolve symlink for source {}: {source}", path.display())]
    Resolution {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Kernel mount syscall failed.
    #[error(
        "could not mount {} to {} (type {fs_type}): {errno}",
        source_path.display(),
        target.display()
    )]
    Mount {
        source_path: PathBuf,
        target: PathBuf,
        fs_type: String,
        #[source]
        errno: Errno,
    },

    /// Kernel unmount syscall failed.
    #[error("could not unmount {}: {errno}", target.display())]
    Unmount {
        target: PathBuf,
        #[source]
        errno: Errno,
    },

    /// No matching hotplug event arrived within the bound.
    #[error("timed out after {timeout:?} waiting for device {device}")]
    DeviceTimeout { device: String, timeout: Duration },

    /// Expected sysfs or device entry is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A SCSI address resolved to more than one block device.
    #[error("expecting a single SCSI device under {}, found {entries:?}", path.display())]
    AmbiguousDevice { path: PathBuf, entries: Vec<String> },

    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem read/write failure (sysfs, mount points, teardown).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Storage operation failed for a reason not covered above.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl HotmountError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this is a hotplug timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeviceTimeout { .. })
    }
}

impl From<io::Error> for HotmountError {
    fn from(err: io::Error) -> Self {
        Self::io("io", err)
    }
}
