//! Mount syscall recorder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hotmount_guest::storage::mount::Mounter;
use nix::errno::Errno;
use nix::mount::MsFlags;
use parking_lot::Mutex;

/// One recorded syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOp {
    Mount {
        source: PathBuf,
        target: PathBuf,
        fs_type: String,
        flags: MsFlags,
        data: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
}

/// Records mounts and keeps a mount table like the kernel would.
///
/// Unmounting a target that is not mounted fails with `EINVAL`.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    ops: Mutex<Vec<MountOp>>,
    table: Mutex<Vec<PathBuf>>,
    fail_mount: Mutex<HashSet<PathBuf>>,
    fail_unmount: Mutex<HashSet<PathBuf>>,
}

impl RecordingMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every syscall so far, in order.
    pub fn ops(&self) -> Vec<MountOp> {
        self.ops.lock().clone()
    }

    /// Only the mount calls.
    pub fn mounts(&self) -> Vec<MountOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, MountOp::Mount { .. }))
            .collect()
    }

    /// Targets currently mounted, oldest first.
    pub fn mount_table(&self) -> Vec<PathBuf> {
        self.table.lock().clone()
    }

    /// Make mounting onto `target` fail with `EPERM`.
    pub fn fail_mount_of(&self, target: impl Into<PathBuf>) {
        self.fail_mount.lock().insert(target.into());
    }

    /// Make unmounting `target` fail with `EBUSY`.
    pub fn fail_unmount_of(&self, target: impl Into<PathBuf>) {
        self.fail_unmount.lock().insert(target.into());
    }
}

impl Mounter for RecordingMounter {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        self.ops.lock().push(MountOp::Mount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_string(),
            flags,
            data: data.map(str::to_string),
        });
        if self.fail_mount.lock().contains(target) {
            return Err(Errno::EPERM);
        }
        self.table.lock().push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), Errno> {
        self.ops.lock().push(MountOp::Unmount {
            target: target.to_path_buf(),
        });
        if self.fail_unmount.lock().contains(target) {
            return Err(Errno::EBUSY);
        }
        let mut table = self.table.lock();
        // Most recent mount on the target goes first
        match table.iter().rposition(|t| t == target) {
            Some(idx) => {
                table.remove(idx);
                Ok(())
            }
            None => Err(Errno::EINVAL),
        }
    }
}
