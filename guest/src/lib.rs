//! Hotmount guest storage core.
//!
//! Detects block devices the hypervisor hotplugs into the VM (SCSI or
//! virtio-blk) and mounts them as container root filesystems.
//!
//! # Example
//!
//! ```no_run
//! use hotmount_guest::config::StorageConfig;
//! use hotmount_guest::storage::{ContainerMountContext, GuestStorage};
//!
//! # async fn example() -> hotmount_shared::HotmountResult<()> {
//! let storage = GuestStorage::new(StorageConfig::default());
//!
//! // Disk attached at SCSI address 2:0, formatted ext4, rootfs under /rootfs
//! let ctx = ContainerMountContext::new("c1", "", "rootfs", "ext4", "2:0");
//! let rootfs = storage.mount_container_rootfs(&ctx).await?;
//!
//! storage.unmount_container_rootfs("c1", &rootfs)?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("Hotmount guest is Linux-only; build with a Linux target");

pub mod config;
pub mod storage;

pub use config::StorageConfig;
pub use storage::{ContainerMountContext, GuestStorage};
