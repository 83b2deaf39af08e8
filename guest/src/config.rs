//! Storage configuration.
//!
//! Fixed path constants the storage core works against. The agent supplies
//! them once at construction; tests substitute temporary roots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hotmount_shared::constants::{fs, hotplug, paths};
use hotmount_shared::errors::{HotmountError, HotmountResult};
use serde::{Deserialize, Serialize};

/// Paths and limits used by every storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mount point of the host-shared 9P directory.
    pub share_dir: PathBuf,

    /// Root of the per-container mount trees (`<root>/<cid>/root`).
    pub container_mount_root: PathBuf,

    /// Device node directory.
    pub dev_root: PathBuf,

    /// Kernel SCSI host registry.
    pub scsi_host_dir: PathBuf,

    /// Kernel SCSI disk class directory.
    pub scsi_disk_dir: PathBuf,

    /// Probe path checked before waiting on a SCSI hotplug.
    pub scsi_probe_path: PathBuf,

    /// Filesystem type used for the shared directory.
    pub share_fs_type: String,

    /// Bound on a single device wait.
    pub device_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            share_dir: PathBuf::from(paths::SHARE_DIR),
            container_mount_root: PathBuf::from(paths::CONTAINER_MOUNT_ROOT),
            dev_root: PathBuf::from(paths::DEV_ROOT),
            scsi_host_dir: PathBuf::from(paths::SCSI_HOST_DIR),
            scsi_disk_dir: PathBuf::from(paths::SCSI_DISK_DIR),
            scsi_probe_path: PathBuf::from(paths::SCSI_PROBE_PATH),
            share_fs_type: fs::TYPE_9P.to_string(),
            device_timeout_ms: hotplug::DEVICE_TIMEOUT_MS,
        }
    }
}

impl StorageConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> HotmountResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HotmountError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            HotmountError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot work with.
    pub fn validate(&self) -> HotmountResult<()> {
        for (name, path) in [
            ("share_dir", &self.share_dir),
            ("container_mount_root", &self.container_mount_root),
            ("dev_root", &self.dev_root),
        ] {
            if !path.is_absolute() {
                return Err(HotmountError::Config(format!(
                    "{} must be absolute, got {}",
                    name,
                    path.display()
                )));
            }
        }
        if self.share_fs_type.is_empty() {
            return Err(HotmountError::Config(
                "share_fs_type must not be empty".to_string(),
            ));
        }
        if self.device_timeout_ms == 0 {
            return Err(HotmountError::Config(
                "device_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    /// `<dev_root>/<name>`
    pub fn device_path(&self, name: &str) -> PathBuf {
        self.dev_root.join(name)
    }

    /// `<container_mount_root>/<cid>`
    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.container_mount_root.join(container_id)
    }

    /// `<container_mount_root>/<cid>/root`
    pub fn container_root(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id)
            .join(paths::CONTAINER_ROOT_DIR)
    }
}
