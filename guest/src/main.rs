//! Entry point for the Hotmount guest agent.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hotmount_guest::config::StorageConfig;
use hotmount_guest::storage::hotplug::DeviceWaitSpec;
use hotmount_guest::storage::{ContainerMountContext, GuestStorage};
use hotmount_shared::errors::{HotmountError, HotmountResult};
use tracing::info;

/// Hotmount Guest Agent - wires hotplugged disks into container rootfs mounts
#[derive(Parser, Debug)]
#[command(author, version, about = "Hotmount Guest Agent - VM-side storage agent")]
struct GuestArgs {
    /// JSON file with storage paths (missing fields use defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the per-container mount root
    #[arg(long, global = true)]
    mount_root: Option<PathBuf>,

    /// Override the shared directory mount point
    #[arg(long, global = true)]
    share_dir: Option<PathBuf>,

    /// Override the device wait bound, in milliseconds
    #[arg(long, global = true)]
    device_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount a container rootfs and print its inner root path
    MountRootfs {
        #[arg(long)]
        container_id: String,
        /// Device name (virtio) or shared-directory image
        #[arg(long, default_value = "")]
        image: String,
        /// Subpath of the rootfs inside the image
        #[arg(long, default_value = "")]
        rootfs: String,
        /// Filesystem type of the block device; empty binds from the share dir
        #[arg(long, default_value = "")]
        fs_type: String,
        /// SCSI `target:lun` address
        #[arg(long, default_value = "")]
        scsi_addr: String,
    },
    /// Tear down a container rootfs
    UnmountRootfs {
        #[arg(long)]
        container_id: String,
        #[arg(long)]
        mounting_path: PathBuf,
    },
    /// Mount the 9P shared directory
    MountShare {
        #[arg(long)]
        tag: String,
    },
    /// Unmount the 9P shared directory
    UnmountShare,
    /// Wait for a block device to be hotplugged
    WaitDevice {
        /// Device name under /dev
        #[arg(long, conflicts_with = "scsi_addr", required_unless_present = "scsi_addr")]
        name: Option<String>,
        /// SCSI `target:lun` address
        #[arg(long)]
        scsi_addr: Option<String>,
    },
}

impl GuestArgs {
    fn storage_config(&self) -> HotmountResult<StorageConfig> {
        let mut config = match &self.config {
            Some(path) => StorageConfig::from_file(path)?,
            None => StorageConfig::default(),
        };
        if let Some(root) = &self.mount_root {
            config.container_mount_root = root.clone();
        }
        if let Some(dir) = &self.share_dir {
            config.share_dir = dir.clone();
        }
        if let Some(ms) = self.device_timeout_ms {
            config.device_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> HotmountResult<()> {
    // Set panic hook to ensure we see panics
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] Guest agent panicked: {}", panic_info);
        std::process::exit(1);
    }));

    // Initialize tracing subscriber - respects RUST_LOG env var
    // Default to "error" level if RUST_LOG is not set
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    let args = GuestArgs::parse();
    let config = args.storage_config()?;
    info!("Hotmount guest agent starting (mount root {})", config.container_mount_root.display());

    let storage = GuestStorage::new(config);

    match args.command {
        Command::MountRootfs {
            container_id,
            image,
            rootfs,
            fs_type,
            scsi_addr,
        } => {
            let ctx = ContainerMountContext::new(container_id, image, rootfs, &fs_type, &scsi_addr);
            let path = storage.mount_container_rootfs(&ctx).await?;
            println!("{}", path.display());
        }
        Command::UnmountRootfs {
            container_id,
            mounting_path,
        } => storage.unmount_container_rootfs(&container_id, &mounting_path)?,
        Command::MountShare { tag } => storage.mount_share_dir(&tag)?,
        Command::UnmountShare => storage.unmount_share_dir()?,
        Command::WaitDevice { name, scsi_addr } => {
            let spec = match (name, scsi_addr) {
                (_, Some(addr)) => DeviceWaitSpec::scsi(&addr),
                (Some(name), None) => DeviceWaitSpec::named(name),
                (None, None) => {
                    return Err(HotmountError::InvalidArgument(
                        "wait-device needs --name or --scsi-addr".to_string(),
                    ))
                }
            };
            storage.wait_for_block_device(&spec).await?;
        }
    }

    Ok(())
}
