//! Container rootfs mounting.
//!
//! Turns an attached disk (or an image staged in the shared directory) into a
//! container rootfs under `<mount_root>/<cid>/root`, and tears it down again.

use std::path::{Component, Path, PathBuf};

use hotmount_shared::errors::{HotmountError, HotmountResult};
use nix::mount::MsFlags;

use super::hotplug::DeviceWaitSpec;
use super::mount::{bind_mount, create_mount_dir, mount, unmount};
use super::scsi::{find_scsi_disk, scan_scsi_bus};
use super::share_dir::remove_tree;
use super::GuestStorage;

/// Everything needed to mount one container rootfs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMountContext {
    pub container_id: String,
    /// Device name under `/dev`, or image directory under the share dir.
    pub image: String,
    /// Subpath inside the mounted image holding the actual rootfs.
    pub rootfs: String,
    /// Filesystem on the block device; `None` means the image is staged in
    /// the shared directory and gets bind mounted.
    pub fs_type: Option<String>,
    /// SCSI `target:lun` of the disk, when attached over SCSI.
    pub scsi_addr: Option<String>,
}

impl ContainerMountContext {
    /// Build a context, treating empty strings as "not supplied".
    pub fn new(
        container_id: impl Into<String>,
        image: impl Into<String>,
        rootfs: impl Into<String>,
        fs_type: &str,
        scsi_addr: &str,
    ) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            container_id: container_id.into(),
            image: image.into(),
            rootfs: rootfs.into(),
            fs_type: non_empty(fs_type),
            scsi_addr: non_empty(scsi_addr),
        }
    }

    /// Reject identifiers that would escape the container mount root.
    pub fn validate(&self) -> HotmountResult<()> {
        if !is_single_component(&self.container_id) {
            return Err(HotmountError::InvalidArgument(format!(
                "invalid container id {:?}",
                self.container_id
            )));
        }
        if !is_contained(&self.rootfs) {
            return Err(HotmountError::InvalidArgument(format!(
                "rootfs path {:?} must stay inside the image",
                self.rootfs
            )));
        }
        match (&self.fs_type, &self.scsi_addr) {
            (Some(_), Some(addr)) if addr.contains('/') => Err(HotmountError::InvalidArgument(
                format!("invalid SCSI address {:?}", addr),
            )),
            (Some(_), None) if !is_single_component(&self.image) => Err(
                HotmountError::InvalidArgument(format!("invalid device name {:?}", self.image)),
            ),
            (None, _) if !is_contained(&self.image) => Err(HotmountError::InvalidArgument(
                format!("image path {:?} must stay inside the share dir", self.image),
            )),
            _ => Ok(()),
        }
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl GuestStorage {
    /// Mount a container rootfs and return the path of its inner root.
    ///
    /// 1. Create `<mount_root>/<cid>/root`
    /// 2. Mount the image there: a SCSI disk found by address, a virtio disk
    ///    found by name, or a bind of the shared-directory image
    /// 3. Recursively bind mount `<root>/<rootfs>` onto itself so it is a
    ///    mount entry of its own
    ///
    /// Nothing is rolled back on failure; see [`Self::unmount_container_rootfs`].
    pub async fn mount_container_rootfs(
        &self,
        ctx: &ContainerMountContext,
    ) -> HotmountResult<PathBuf> {
        ctx.validate()?;

        let dest = self.config.container_root(&ctx.container_id);
        create_mount_dir(&dest)?;

        match ctx.fs_type.as_deref() {
            Some(fs_type) => {
                let source = match ctx.scsi_addr.as_deref() {
                    Some(scsi_addr) => self.resolve_scsi_device(scsi_addr).await?,
                    None => {
                        self.waiter
                            .wait_for_block_device(&DeviceWaitSpec::named(&ctx.image))
                            .await?;
                        self.config.device_path(&ctx.image)
                    }
                };

                tracing::info!(
                    container_id = %ctx.container_id,
                    "Mounting block device: {} → {} (filesystem={})",
                    source.display(),
                    dest.display(),
                    fs_type
                );
                mount(self.mounter(), &source, &dest, fs_type, MsFlags::empty())?;
            }
            None => {
                let source = self.config.share_dir.join(&ctx.image);
                tracing::info!(
                    container_id = %ctx.container_id,
                    "Binding shared image: {} → {}",
                    source.display(),
                    dest.display()
                );
                bind_mount(self.mounter(), &source, &dest, false)?;
            }
        }

        let mounting_path = dest.join(&ctx.rootfs);
        bind_mount(self.mounter(), &mounting_path, &mounting_path, true)?;

        tracing::info!(
            container_id = %ctx.container_id,
            "Container rootfs ready at {}",
            mounting_path.display()
        );

        if tracing::enabled!(tracing::Level::TRACE) {
            log_directory_tree(&mounting_path, 0, 2);
        }

        Ok(mounting_path)
    }

    /// Undo [`Self::mount_container_rootfs`].
    ///
    /// Unmounts the inner root, then the container root, then removes the
    /// container's directory tree. Stops at the first failed unmount.
    pub fn unmount_container_rootfs(
        &self,
        container_id: &str,
        mounting_path: &Path,
    ) -> HotmountResult<()> {
        if !is_single_component(container_id) {
            return Err(HotmountError::InvalidArgument(format!(
                "invalid container id {:?}",
                container_id
            )));
        }

        unmount(self.mounter(), mounting_path)?;

        let container_root = self.config.container_root(container_id);
        unmount(self.mounter(), &container_root)?;

        remove_tree(&self.config.container_dir(container_id))?;

        tracing::info!(container_id, "Container rootfs removed");
        Ok(())
    }

    /// Rescan, wait for the hotplug, and resolve the disk at `scsi_addr`.
    async fn resolve_scsi_device(&self, scsi_addr: &str) -> HotmountResult<PathBuf> {
        tracing::info!("SCSI address provided: {}", scsi_addr);

        scan_scsi_bus(&self.config.scsi_host_dir)?;

        self.waiter
            .wait_for_block_device(&DeviceWaitSpec::scsi(scsi_addr))
            .await?;

        match find_scsi_disk(&self.config.scsi_disk_dir, scsi_addr) {
            Ok(name) => {
                tracing::debug!(scsi_addr, disk = %name, "Resolved SCSI disk");
                Ok(self.config.device_path(&name))
            }
            Err(e) => {
                if let Err(diag_err) = self.diagnostics.dump(scsi_addr).await {
                    tracing::warn!(scsi_addr, "Diagnostics failed: {}", diag_err);
                }
                Err(e)
            }
        }
    }
}

/// Log a glance view of a mounted tree.
fn log_directory_tree(path: &Path, current_depth: usize, max_depth: usize) {
    if current_depth > max_depth {
        return;
    }

    let indent = "  ".repeat(current_depth);
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            if current_depth == 0 {
                tracing::warn!("Could not read contents of {}: {}", path.display(), e);
            }
            return;
        }
    };

    let mut items: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    items.sort_by_key(|e| e.file_name());

    if current_depth == 0 && items.is_empty() {
        tracing::trace!("{}(empty)", indent);
    }

    for entry in items {
        let name = entry.file_name();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {
                tracing::trace!("{}{}/", indent, name.to_string_lossy());
                log_directory_tree(&entry.path(), current_depth + 1, max_depth);
            }
            Ok(_) => tracing::trace!("{}{}", indent, name.to_string_lossy()),
            Err(_) => {}
        }
    }
}
