//! Storage operations (device hotplug and container rootfs mounting).
//!
//! Provides the guest-side half of disk attach:
//! - Hotplug: wait for a disk the hypervisor attached (SCSI or virtio-blk)
//! - Rootfs: mount the disk (or a shared-directory image) as a container rootfs
//! - Share dir: the 9P directory the host stages images in
//!
//! [`GuestStorage`] owns the configuration and the collaborators every
//! operation needs; it is the only entry point the agent uses.

pub mod diagnostics;
pub mod hotplug;
pub mod mount;
mod rootfs;
pub mod scsi;
mod share_dir;
pub mod uevent;

use std::sync::Arc;

use hotmount_shared::errors::HotmountResult;

use crate::config::StorageConfig;
use diagnostics::{CommandDiagnostics, DiagnosticsHook};
use hotplug::{DeviceWaitSpec, HotplugWaiter};
use mount::{Mounter, SyscallMounter};
use uevent::{NetlinkUeventMonitor, UeventMonitor};

pub use rootfs::ContainerMountContext;
pub use share_dir::ShareDirMount;

/// Guest storage subsystem.
pub struct GuestStorage {
    config: StorageConfig,
    mounter: Arc<dyn Mounter>,
    waiter: HotplugWaiter,
    diagnostics: Arc<dyn DiagnosticsHook>,
}

impl GuestStorage {
    /// Storage backed by the real kernel: mount syscalls, netlink uevents and
    /// command-based diagnostics.
    pub fn new(config: StorageConfig) -> Self {
        let diagnostics = Arc::new(CommandDiagnostics::new(&config.scsi_disk_dir));
        Self::with_parts(
            config,
            Arc::new(SyscallMounter),
            Arc::new(NetlinkUeventMonitor::default()),
            diagnostics,
        )
    }

    /// Storage with explicit collaborators.
    pub fn with_parts(
        config: StorageConfig,
        mounter: Arc<dyn Mounter>,
        monitor: Arc<dyn UeventMonitor>,
        diagnostics: Arc<dyn DiagnosticsHook>,
    ) -> Self {
        let waiter = HotplugWaiter::new(&config, monitor);
        Self {
            config,
            mounter,
            waiter,
            diagnostics,
        }
    }

    /// Wait for a block device to be hotplugged.
    pub async fn wait_for_block_device(&self, spec: &DeviceWaitSpec) -> HotmountResult<()> {
        self.waiter.wait_for_block_device(spec).await
    }

    /// Mount the host-shared directory identified by transport `tag`.
    pub fn mount_share_dir(&self, tag: &str) -> HotmountResult<()> {
        ShareDirMount::mount(
            self.mounter.as_ref(),
            tag,
            &self.config.share_dir,
            &self.config.share_fs_type,
        )
    }

    /// Unmount the shared directory and drop every container mount tree.
    pub fn unmount_share_dir(&self) -> HotmountResult<()> {
        ShareDirMount::unmount(
            self.mounter.as_ref(),
            &self.config.share_dir,
            &self.config.container_mount_root,
        )
    }

    fn mounter(&self) -> &dyn Mounter {
        self.mounter.as_ref()
    }
}
