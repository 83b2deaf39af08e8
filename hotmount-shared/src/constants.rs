//! Shared constants
//!
//! Fixed paths and protocol values the guest storage core defaults to.
//! The agent may override every path through `StorageConfig`.

/// Guest filesystem locations.
pub mod paths {
    /// Mount point of the host-shared 9P directory.
    pub const SHARE_DIR: &str = "/tmp/shareDir";

    /// Root under which per-container mount trees are created.
    pub const CONTAINER_MOUNT_ROOT: &str = "/tmp/hyper";

    /// Device node directory.
    pub const DEV_ROOT: &str = "/dev";

    /// Kernel SCSI host registry.
    pub const SCSI_HOST_DIR: &str = "/sys/class/scsi_host";

    /// Kernel SCSI disk class, keyed by `host:channel:target:lun`.
    pub const SCSI_DISK_DIR: &str = "/sys/class/scsi_disk";

    /// Probe path of the very first SCSI disk.
    pub const SCSI_PROBE_PATH: &str = "/sys/class/scsi_device/0:0:0:0";

    /// Directory created under each container's mount tree.
    pub const CONTAINER_ROOT_DIR: &str = "root";
}

/// Filesystem types and mount data.
pub mod fs {
    /// Pseudo filesystem type used for bind mounts.
    pub const BIND: &str = "bind";

    /// XFS refuses duplicate UUIDs unless told otherwise.
    pub const XFS: &str = "xfs";

    /// Mount option letting cloned XFS volumes coexist.
    pub const XFS_NOUUID: &str = "nouuid";

    /// Filesystem type of the host-shared directory.
    pub const TYPE_9P: &str = "9p";

    /// Mount data for the 9P share.
    pub const TRANS_VIRTIO: &str = "trans=virtio";

    /// Permission bits for created mount points (rwxr-xr-x).
    pub const MOUNT_PERM: u32 = 0o755;
}

/// Hotplug and SCSI protocol values.
pub mod hotplug {
    /// Bound on a single wait for a hotplugged device, in milliseconds.
    pub const DEVICE_TIMEOUT_MS: u64 = 3000;

    /// Kernel uevent subsystem for block devices.
    pub const SUBSYSTEM_BLOCK: &str = "block";

    /// Kernel uevent devtype for whole disks.
    pub const DEVTYPE_DISK: &str = "disk";

    /// Uevent action for a newly attached device.
    pub const ACTION_ADD: &str = "add";

    /// Wildcard channel/id/lun written to a host's `scan` file.
    pub const SCSI_SCAN_WILDCARD: &str = "0 0 0";

    /// Host and channel prefix of every SCSI address the agent resolves.
    pub const SCSI_HOST_CHANNEL: &str = "0:0";
}
