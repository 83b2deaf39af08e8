//! Mount primitive.
//!
//! Wraps the kernel mount syscall with the bookkeeping every caller needs:
//! - evaluate all symlinks in the source
//! - ensure the destination exists with a file type matching the source
//! - pick filesystem-specific mount options

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use hotmount_shared::constants::fs;
use hotmount_shared::errors::{HotmountError, HotmountResult};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::mount::{umount2, MntFlags, MsFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;

/// Kernel mount syscall boundary.
///
/// `SyscallMounter` is the real implementation; tests substitute a recorder so
/// the bookkeeping around the syscall can be exercised without privileges.
pub trait Mounter: Send + Sync {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;

    fn unmount(&self, target: &Path) -> Result<(), Errno>;
}

/// Mounts through `mount(2)` / `umount2(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallMounter;

impl Mounter for SyscallMounter {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        nix::mount::mount(Some(source), target, Some(fs_type), flags, data)
    }

    fn unmount(&self, target: &Path) -> Result<(), Errno> {
        umount2(target, MntFlags::empty())
    }
}

/// A single mount to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub fs_type: String,
    pub flags: MsFlags,
    pub options: Option<&'static str>,
}

impl MountRequest {
    /// Build a request, deriving options from the filesystem type.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        fs_type: impl Into<String>,
        flags: MsFlags,
    ) -> Self {
        let fs_type = fs_type.into();
        let options = mount_options(&fs_type);
        Self {
            source: source.into(),
            destination: destination.into(),
            fs_type,
            flags,
            options,
        }
    }

    /// Bind mount request (`MS_BIND`, plus `MS_REC` when recursive).
    pub fn bind(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        recursive: bool,
    ) -> Self {
        let mut flags = MsFlags::MS_BIND;
        if recursive {
            flags |= MsFlags::MS_REC;
        }
        Self::new(source, destination, fs::BIND, flags)
    }

    /// Resolve the source, bootstrap the destination and mount.
    ///
    /// Returns the resolved absolute source that was handed to the kernel.
    pub fn perform(&self, mounter: &dyn Mounter) -> HotmountResult<PathBuf> {
        let abs_source =
            std::fs::canonicalize(&self.source).map_err(|e| HotmountError::Resolution {
                path: self.source.clone(),
                source: e,
            })?;

        ensure_destination_exists(&abs_source, &self.destination, &self.fs_type)?;

        tracing::debug!(
            "Mounting {} → {} (type={}, flags={:?}, options={:?})",
            abs_source.display(),
            self.destination.display(),
            self.fs_type,
            self.flags,
            self.options
        );

        mounter
            .mount(
                &abs_source,
                &self.destination,
                &self.fs_type,
                self.flags,
                self.options,
            )
            .map_err(|errno| HotmountError::Mount {
                source_path: abs_source.clone(),
                target: self.destination.clone(),
                fs_type: self.fs_type.clone(),
                errno,
            })?;

        Ok(abs_source)
    }
}

/// Filesystem-specific mount data. Only XFS needs any.
pub fn mount_options(fs_type: &str) -> Option<&'static str> {
    if fs_type == fs::XFS {
        Some(fs::XFS_NOUUID)
    } else {
        None
    }
}

/// Mount `source` on `destination` with the given filesystem type.
pub fn mount(
    mounter: &dyn Mounter,
    source: &Path,
    destination: &Path,
    fs_type: &str,
    flags: MsFlags,
) -> HotmountResult<()> {
    MountRequest::new(source, destination, fs_type, flags)
        .perform(mounter)
        .map(|_| ())
}

/// Bind mount `source` on `destination`.
pub fn bind_mount(
    mounter: &dyn Mounter,
    source: &Path,
    destination: &Path,
    recursive: bool,
) -> HotmountResult<()> {
    MountRequest::bind(source, destination, recursive)
        .perform(mounter)
        .map(|_| ())
}

/// Unmount `target` without flags.
pub fn unmount(mounter: &dyn Mounter, target: &Path) -> HotmountResult<()> {
    tracing::debug!("Unmounting {}", target.display());
    mounter
        .unmount(target)
        .map_err(|errno| HotmountError::Unmount {
            target: target.to_path_buf(),
            errno,
        })
}

/// Create a directory tree with mount point permissions.
pub fn create_mount_dir(path: &Path) -> HotmountResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(fs::MOUNT_PERM)
        .create(path)
        .map_err(|e| {
            HotmountError::io(
                format!("Failed to create mount point {}", path.display()),
                e,
            )
        })
}

/// Create the mount point for `source` at `destination`.
///
/// Parents are created recursively. A regular file is created when this is a
/// bind mount of a non-directory; a directory otherwise. An existing
/// destination is accepted as is.
pub fn ensure_destination_exists(
    source: &Path,
    destination: &Path,
    fs_type: &str,
) -> HotmountResult<()> {
    let metadata = std::fs::metadata(source).map_err(|e| {
        HotmountError::io(
            format!("Could not stat source location {}", source.display()),
            e,
        )
    })?;

    if let Some(parent) = destination.parent() {
        create_mount_dir(parent)?;
    }

    let created = if fs_type != fs::BIND || metadata.is_dir() {
        DirBuilder::new().mode(fs::MOUNT_PERM).create(destination)
    } else {
        // O_RDONLY: an existing file need not be writable
        open(
            destination,
            OFlag::O_CREAT | OFlag::O_RDONLY | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(fs::MOUNT_PERM),
        )
        .and_then(close)
        .map_err(io::Error::from)
    };

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(HotmountError::io(
            format!(
                "Could not create destination mount point {}",
                destination.display()
            ),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMounter {
        calls: Mutex<Vec<(PathBuf, PathBuf, String, MsFlags, Option<String>)>>,
        fail_with: Option<Errno>,
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
            if let Some(errno) = self.fail_with {
                return Err(errno);
            }
            self.calls.lock().unwrap().push((
                source.to_path_buf(),
                target.to_path_buf(),
                fs_type.to_string(),
                flags,
                data.map(str::to_string),
            ));
            Ok(())
        }

        fn unmount(&self, _target: &Path) -> Result<(), Errno> {
            self.fail_with.map_or(Ok(()), Err)
        }
    }

    #[test]
    fn test_xfs_gets_nouuid() {
        assert_eq!(mount_options("xfs"), Some("nouuid"));
        assert_eq!(mount_options("ext4"), None);
        assert_eq!(mount_options("bind"), None);
        assert_eq!(mount_options(""), None);
    }

    #[test]
    fn test_bind_flags() {
        let req = MountRequest::bind("/a", "/b", false);
        assert_eq!(req.flags, MsFlags::MS_BIND);
        assert_eq!(req.fs_type, "bind");

        let req = MountRequest::bind("/a", "/b", true);
        assert_eq!(req.flags, MsFlags::MS_BIND | MsFlags::MS_REC);
    }

    #[test]
    fn test_destination_dir_for_dir_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let dst = tmp.path().join("a/b/dst");

        ensure_destination_exists(&src, &dst, "bind").unwrap();
        assert!(dst.is_dir());

        // Idempotent
        ensure_destination_exists(&src, &dst, "bind").unwrap();
        assert!(dst.is_dir());
    }

    #[test]
    fn test_destination_file_for_file_bind() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("resolv.conf");
        std::fs::write(&src, "nameserver 10.0.0.1").unwrap();
        let dst = tmp.path().join("etc/resolv.conf");

        ensure_destination_exists(&src, &dst, "bind").unwrap();
        assert!(dst.is_file());
        assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);

        ensure_destination_exists(&src, &dst, "bind").unwrap();
        assert!(dst.is_file());
    }

    #[test]
    fn test_existing_read_only_destination_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("seqnum");
        std::fs::write(&src, "42").unwrap();
        let dst = tmp.path().join("uevent_seqnum");
        std::fs::write(&dst, "7").unwrap();
        std::fs::set_permissions(&dst, std::fs::Permissions::from_mode(0o444)).unwrap();

        ensure_destination_exists(&src, &dst, "bind").unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "7");
        assert_eq!(std::fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn test_destination_dir_for_non_bind_file_source() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = tmp.path().join("sda");
        std::fs::write(&dev, b"").unwrap();
        let dst = tmp.path().join("mnt");

        ensure_destination_exists(&dev, &dst, "ext4").unwrap();
        assert!(dst.is_dir());
    }

    #[test]
    fn test_destination_parent_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let dst = tmp.path().join("parent/dst");

        ensure_destination_exists(&src, &dst, "bind").unwrap();
        let mode = std::fs::metadata(tmp.path().join("parent"))
            .unwrap()
            .permissions()
            .mode();
        // umask can only clear bits
        assert_eq!(mode & 0o022, 0);
        assert_eq!(mode & 0o700, 0o700);
    }

    #[test]
    fn test_missing_source_is_resolution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = RecordingMounter::default();
        let err = bind_mount(
            &mounter,
            &tmp.path().join("missing"),
            &tmp.path().join("dst"),
            false,
        )
        .unwrap_err();

        assert!(matches!(err, HotmountError::Resolution { .. }));
        assert!(mounter.calls.lock().unwrap().is_empty());
        assert!(!tmp.path().join("dst").exists());
    }

    #[test]
    fn test_mount_uses_resolved_source() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let dst = tmp.path().join("dst");

        let mounter = RecordingMounter::default();
        mount(&mounter, &link, &dst, "xfs", MsFlags::empty()).unwrap();

        let calls = mounter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (source, target, fs_type, _, data) = &calls[0];
        assert_eq!(source, &std::fs::canonicalize(&real).unwrap());
        assert_eq!(target, &dst);
        assert_eq!(fs_type, "xfs");
        assert_eq!(data.as_deref(), Some("nouuid"));
    }

    #[test]
    fn test_mount_failure_carries_errno() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let mounter = RecordingMounter {
            fail_with: Some(Errno::EPERM),
            ..Default::default()
        };

        let err = bind_mount(&mounter, &src, &tmp.path().join("dst"), true).unwrap_err();
        match err {
            HotmountError::Mount { errno, fs_type, .. } => {
                assert_eq!(errno, Errno::EPERM);
                assert_eq!(fs_type, "bind");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unmount_failure() {
        let mounter = RecordingMounter {
            fail_with: Some(Errno::EBUSY),
            ..Default::default()
        };
        let err = unmount(&mounter, Path::new("/tmp/hyper/c1/root")).unwrap_err();
        assert!(matches!(
            err,
            HotmountError::Unmount {
                errno: Errno::EBUSY,
                ..
            }
        ));
    }
}
