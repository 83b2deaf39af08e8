//! Kernel device-notification source.
//!
//! Subscribes to kernel uevents over a `NETLINK_KOBJECT_UEVENT` socket and
//! yields parsed [`DeviceEvent`]s for one subsystem/devtype pair. A
//! subscription is a plain stream: dropping it closes the socket.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;

use futures::Stream;
use hotmount_shared::constants::hotplug;
use hotmount_shared::errors::{HotmountError, HotmountResult};
use nix::sys::socket::{
    bind, recv, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use tokio::io::unix::AsyncFd;

/// Multicast group the kernel broadcasts uevents on.
const KERNEL_UEVENT_GROUP: u32 = 1;

/// Large enough for any single uevent message.
const UEVENT_BUFFER_SIZE: usize = 8192;

/// Header udevd prepends to re-broadcast events.
const LIBUDEV_MAGIC: &[u8] = b"libudev";

/// A parsed kernel uevent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceEvent {
    pub action: String,
    /// Kernel device path, e.g. `/devices/pci0000:00/.../host0/target0:0:2/0:0:2:0/block/sda`
    pub devpath: String,
    pub subsystem: String,
    pub devtype: String,
    /// Node name under `/dev`, when the kernel reports one.
    pub devname: Option<String>,
    pub seqnum: Option<u64>,
}

impl DeviceEvent {
    /// `add` event for a whole block disk.
    pub fn block_add(devpath: impl Into<String>) -> Self {
        let devpath = devpath.into();
        let devname = devpath.rsplit('/').next().map(str::to_string);
        Self {
            action: hotplug::ACTION_ADD.to_string(),
            devpath,
            subsystem: hotplug::SUBSYSTEM_BLOCK.to_string(),
            devtype: hotplug::DEVTYPE_DISK.to_string(),
            devname,
            seqnum: None,
        }
    }

    /// Path of the device under sysfs.
    pub fn syspath(&self) -> String {
        format!("/sys{}", self.devpath)
    }

    pub fn is_add(&self) -> bool {
        self.action == hotplug::ACTION_ADD
    }

    /// Parse a raw kernel uevent datagram.
    ///
    /// The kernel sends `ACTION@DEVPATH\0KEY=VALUE\0...`. Messages
    /// re-broadcast by udevd carry a binary header and are not handled.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.starts_with(LIBUDEV_MAGIC) {
            return None;
        }

        let mut fields = raw.split(|b| *b == 0).filter(|f| !f.is_empty());
        let header = std::str::from_utf8(fields.next()?).ok()?;
        let (header_action, header_devpath) = header.split_once('@')?;

        let env: HashMap<&str, &str> = fields
            .filter_map(|f| std::str::from_utf8(f).ok())
            .filter_map(|kv| kv.split_once('='))
            .collect();

        Some(Self {
            action: env.get("ACTION").unwrap_or(&header_action).to_string(),
            devpath: env.get("DEVPATH").unwrap_or(&header_devpath).to_string(),
            subsystem: env.get("SUBSYSTEM").copied().unwrap_or_default().to_string(),
            devtype: env.get("DEVTYPE").copied().unwrap_or_default().to_string(),
            devname: env.get("DEVNAME").map(|s| s.to_string()),
            seqnum: env.get("SEQNUM").and_then(|s| s.parse().ok()),
        })
    }
}

/// Stream of device events; dropping it cancels the subscription.
pub type DeviceEventStream = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

/// Source of device-notification subscriptions.
pub trait UeventMonitor: Send + Sync {
    /// Start listening. Only events for block disks are yielded.
    ///
    /// Must be called from within a tokio runtime.
    fn subscribe(&self) -> HotmountResult<DeviceEventStream>;
}

/// Listens to kernel uevents on a netlink socket.
#[derive(Debug, Clone)]
pub struct NetlinkUeventMonitor {
    subsystem: String,
    devtype: String,
}

impl Default for NetlinkUeventMonitor {
    fn default() -> Self {
        Self::new(hotplug::SUBSYSTEM_BLOCK, hotplug::DEVTYPE_DISK)
    }
}

impl NetlinkUeventMonitor {
    pub fn new(subsystem: impl Into<String>, devtype: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            devtype: devtype.into(),
        }
    }

    fn wants(&self, event: &DeviceEvent) -> bool {
        event.subsystem == self.subsystem && event.devtype == self.devtype
    }

    fn open_socket() -> HotmountResult<OwnedFd> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(|e| HotmountError::io("Failed to create uevent socket", e.into()))?;

        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, KERNEL_UEVENT_GROUP))
            .map_err(|e| HotmountError::io("Failed to bind uevent socket", e.into()))?;

        Ok(fd)
    }
}

impl UeventMonitor for NetlinkUeventMonitor {
    fn subscribe(&self) -> HotmountResult<DeviceEventStream> {
        use async_stream::stream;

        let fd = AsyncFd::new(Self::open_socket()?)
            .map_err(|e| HotmountError::io("Failed to register uevent socket", e))?;
        let filter = self.clone();

        let stream = stream! {
            let mut buf = vec![0u8; UEVENT_BUFFER_SIZE];
            loop {
                let mut guard = match fd.readable().await {
                    Ok(guard) => guard,
                    Err(e) => {
                        tracing::warn!("uevent socket poll failed: {}", e);
                        break;
                    }
                };

                let received = guard.try_io(|inner| {
                    recv(inner.as_raw_fd(), &mut buf, MsgFlags::empty()).map_err(io::Error::from)
                });
                drop(guard);

                let len = match received {
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) if e.raw_os_error() == Some(nix::libc::ENOBUFS) => {
                        // Receive queue overflowed; later events are still delivered.
                        tracing::warn!("uevent socket overrun, events were dropped");
                        continue;
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(Err(e)) => {
                        tracing::warn!("uevent socket read failed: {}", e);
                        break;
                    }
                    Err(_would_block) => continue,
                };

                if let Some(event) = DeviceEvent::parse(&buf[..len]) {
                    if filter.wants(&event) {
                        yield event;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
