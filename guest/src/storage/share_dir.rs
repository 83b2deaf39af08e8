//! Shared directory mount helper.
//!
//! Mounts the host-shared 9P filesystem that stages images when no block
//! device is attached.

use std::path::Path;

use hotmount_shared::constants::fs;
use hotmount_shared::errors::{HotmountError, HotmountResult};
use nix::mount::MsFlags;

use super::mount::{create_mount_dir, unmount, Mounter};

/// Mounts and unmounts the shared directory.
pub struct ShareDirMount;

impl ShareDirMount {
    /// Mount transport `tag` at `mount_point`.
    pub fn mount(
        mounter: &dyn Mounter,
        tag: &str,
        mount_point: &Path,
        fs_type: &str,
    ) -> HotmountResult<()> {
        if tag.is_empty() {
            return Err(HotmountError::InvalidArgument(
                "Invalid mount tag, should not be empty".to_string(),
            ));
        }

        tracing::info!("Mounting {}: {} → {}", fs_type, tag, mount_point.display());

        create_mount_dir(mount_point)?;

        mounter
            .mount(
                Path::new(tag),
                mount_point,
                fs_type,
                MsFlags::MS_NODEV,
                Some(fs::TRANS_VIRTIO),
            )
            .map_err(|errno| HotmountError::Mount {
                source_path: tag.into(),
                target: mount_point.to_path_buf(),
                fs_type: fs_type.to_string(),
                errno,
            })?;

        tracing::info!("Mounted {}: {} → {}", fs_type, tag, mount_point.display());
        Ok(())
    }

    /// Unmount `mount_point`, then remove every container mount tree.
    pub fn unmount(
        mounter: &dyn Mounter,
        mount_point: &Path,
        container_mount_root: &Path,
    ) -> HotmountResult<()> {
        unmount(mounter, mount_point)?;

        remove_tree(container_mount_root)?;
        tracing::info!("Unmounted shared directory {}", mount_point.display());
        Ok(())
    }
}

/// `rm -rf`, treating an absent path as already removed.
pub(crate) fn remove_tree(path: &Path) -> HotmountResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HotmountError::io(
            format!("Failed to remove {}", path.display()),
            e,
        )),
    }
}
