//! Temporary guest filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotmount_guest::config::StorageConfig;
use hotmount_guest::storage::uevent::DeviceEvent;
use hotmount_guest::storage::GuestStorage;
use tempfile::TempDir;

use crate::{RecordingDiagnostics, RecordingMounter, ScriptedUeventMonitor};

/// A fake guest: `/dev`, the SCSI sysfs classes, a share dir and a mount
/// root, all under one temporary directory, plus recording collaborators.
///
/// ```text
/// {root}/
/// ├── dev/
/// ├── sys/class/scsi_host/host0/
/// ├── sys/class/scsi_disk/
/// ├── sys/class/scsi_device/      # probe path lives here
/// ├── shareDir/
/// └── hyper/                      # container mount root
/// ```
pub struct GuestFixture {
    config: StorageConfig,
    pub mounter: Arc<RecordingMounter>,
    pub monitor: Arc<ScriptedUeventMonitor>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    _temp_dir: TempDir, // Dropped after test
}

impl GuestFixture {
    pub fn new() -> Self {
        Self::with_diagnostics(RecordingDiagnostics::new())
    }

    pub fn with_diagnostics(diagnostics: RecordingDiagnostics) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        let sys = root.join("sys/class");

        let config = StorageConfig {
            share_dir: root.join("shareDir"),
            container_mount_root: root.join("hyper"),
            dev_root: root.join("dev"),
            scsi_host_dir: sys.join("scsi_host"),
            scsi_disk_dir: sys.join("scsi_disk"),
            scsi_probe_path: sys.join("scsi_device/0:0:0:0"),
            ..Default::default()
        };

        for dir in [
            &config.dev_root,
            &config.scsi_host_dir.join("host0"),
            &config.scsi_disk_dir,
            &sys.join("scsi_device"),
        ] {
            std::fs::create_dir_all(dir).expect("Failed to create fixture dir");
        }

        Self {
            config,
            mounter: Arc::new(RecordingMounter::new()),
            monitor: Arc::new(ScriptedUeventMonitor::new()),
            diagnostics: Arc::new(diagnostics),
            _temp_dir: temp_dir,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Storage wired to this fixture's collaborators.
    pub fn storage(&self) -> GuestStorage {
        GuestStorage::with_parts(
            self.config.clone(),
            self.mounter.clone(),
            self.monitor.clone(),
            self.diagnostics.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Create `/dev/<name>` as an empty file.
    pub fn add_device_node(&self, name: &str) -> PathBuf {
        let path = self.config.dev_root.join(name);
        std::fs::write(&path, b"").expect("Failed to create device node");
        path
    }

    /// Sysfs directory the resolver lists for `scsi_addr`.
    pub fn scsi_block_dir(&self, scsi_addr: &str) -> PathBuf {
        self.config
            .scsi_disk_dir
            .join(format!("0:0:{}", scsi_addr))
            .join("device/block")
    }

    /// Publish disk `name` at `scsi_addr` in sysfs and `/dev`.
    pub fn attach_scsi_disk(&self, scsi_addr: &str, name: &str) -> PathBuf {
        std::fs::create_dir_all(self.scsi_block_dir(scsi_addr).join(name))
            .expect("Failed to create scsi disk entry");
        self.add_device_node(name)
    }

    /// Kernel devpath of a SCSI disk on host0.
    pub fn scsi_devpath(scsi_addr: &str, name: &str) -> String {
        let target = scsi_addr.split(':').next().unwrap_or("0");
        format!(
            "/devices/pci0000:00/0000:00:05.0/virtio2/host0/target0:0:{}/0:0:{}/block/{}",
            target, scsi_addr, name
        )
    }

    /// `add` event for the SCSI disk.
    pub fn scsi_add_event(scsi_addr: &str, name: &str) -> DeviceEvent {
        DeviceEvent::block_add(Self::scsi_devpath(scsi_addr, name))
    }

    /// `add` event for a virtio disk.
    pub fn virtio_add_event(name: &str) -> DeviceEvent {
        DeviceEvent::block_add(format!(
            "/devices/pci0000:00/0000:00:06.0/virtio3/block/{}",
            name
        ))
    }

    /// Stage `<share>/<image>/<rootfs>` as if the host copied an image in.
    pub fn stage_share_image(&self, image: &str, rootfs: &str) -> PathBuf {
        let path = self.config.share_dir.join(image);
        std::fs::create_dir_all(path.join(rootfs)).expect("Failed to stage image");
        path
    }

    /// Create `<mount_root>/<cid>/root/<rootfs>`.
    ///
    /// Recorded mounts do not expose the image contents, so the inner root a
    /// real mount would reveal is created up front.
    pub fn prepare_inner_root(&self, container_id: &str, rootfs: &str) -> PathBuf {
        let path = self.config.container_root(container_id).join(rootfs);
        std::fs::create_dir_all(&path).expect("Failed to create inner root");
        path
    }
}

impl Default for GuestFixture {
    fn default() -> Self {
        Self::new()
    }
}
