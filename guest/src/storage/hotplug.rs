//! Block device hotplug waiter.
//!
//! Hypervisor-attached disks show up asynchronously and their kernel name is
//! not known up front. Waiting subscribes to kernel uevents and races the
//! subscription against a fixed timer instead of polling `/dev`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hotmount_shared::errors::{HotmountError, HotmountResult};
use tokio::sync::oneshot;

use super::uevent::{DeviceEvent, UeventMonitor};
use crate::config::StorageConfig;

/// How a waited-for device is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Name is a `target:lun/block` fragment matched anywhere in the devpath.
    Scsi,
    /// Name must equal the devpath's final component.
    Named,
}

/// Device to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceWaitSpec {
    /// Bare name, never a full path.
    pub name: String,
    pub mode: AddressingMode,
}

impl DeviceWaitSpec {
    /// Wait for the disk bound to a SCSI `target:lun` address.
    pub fn scsi(scsi_addr: &str) -> Self {
        Self {
            name: format!("0:{}/block", scsi_addr),
            mode: AddressingMode::Scsi,
        }
    }

    /// Wait for `/dev/<name>`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: AddressingMode::Named,
        }
    }

    /// Whether `event` announces this device.
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        if !event.is_add() {
            return false;
        }
        match self.mode {
            AddressingMode::Scsi => event.devpath.contains(&self.name),
            AddressingMode::Named => {
                event.devpath.rsplit('/').next() == Some(self.name.as_str())
            }
        }
    }
}

/// Waits for block devices to be hotplugged.
#[derive(Clone)]
pub struct HotplugWaiter {
    monitor: Arc<dyn UeventMonitor>,
    dev_root: PathBuf,
    scsi_probe_path: PathBuf,
    timeout: Duration,
}

impl HotplugWaiter {
    pub fn new(config: &StorageConfig, monitor: Arc<dyn UeventMonitor>) -> Self {
        Self {
            monitor,
            dev_root: config.dev_root.clone(),
            scsi_probe_path: config.scsi_probe_path.clone(),
            timeout: config.device_timeout(),
        }
    }

    /// Path whose presence means the device is already there.
    fn probe_path(&self, spec: &DeviceWaitSpec) -> PathBuf {
        match spec.mode {
            AddressingMode::Scsi => self.scsi_probe_path.clone(),
            AddressingMode::Named => self.dev_root.join(&spec.name),
        }
    }

    fn already_present(&self, spec: &DeviceWaitSpec) -> bool {
        self.probe_path(spec).exists()
    }

    /// Block until the device appears or the timeout elapses.
    ///
    /// Returns at once, without subscribing, when the device is already
    /// present. Otherwise the subscription is dropped before returning,
    /// whichever way the wait ends.
    pub async fn wait_for_block_device(&self, spec: &DeviceWaitSpec) -> HotmountResult<()> {
        if self.already_present(spec) {
            tracing::debug!(device = %spec.name, "Device already present, not waiting");
            return Ok(());
        }

        let mut events = self.monitor.subscribe()?;
        let (done_tx, done_rx) = oneshot::channel::<bool>();

        let listener = {
            let spec = spec.clone();
            let waiter = self.clone();
            tokio::spawn(async move {
                tracing::info!(
                    device = %spec.name,
                    "Started listening for udev events for block device hotplug"
                );

                // Close the gap between the fast path and the subscription.
                if waiter.already_present(&spec) {
                    tracing::info!(device = %spec.name, "Device already hotplugged, quit listening");
                    let _ = done_tx.send(true);
                    return;
                }

                let mut matched = false;
                while let Some(event) = events.next().await {
                    tracing::debug!(
                        device = %spec.name,
                        udev_path = %event.syspath(),
                        dev_path = %event.devpath,
                        udev_event = %event.action,
                        "got udev event"
                    );
                    if spec.matches(&event) {
                        tracing::info!(device = %spec.name, dev_path = %event.devpath, "Hotplug event received");
                        matched = true;
                        break;
                    }
                }
                drop(events);
                let _ = done_tx.send(matched);
            })
        };

        let outcome = tokio::select! {
            done = done_rx => Some(done.unwrap_or(false)),
            _ = tokio::time::sleep(self.timeout) => None,
        };

        // No-op when the listener already finished.
        listener.abort();
        let _ = listener.await;

        match outcome {
            Some(true) => Ok(()),
            Some(false) if self.already_present(spec) => Ok(()),
            Some(false) => Err(HotmountError::Storage(format!(
                "device event stream ended before {} appeared",
                spec.name
            ))),
            None => {
                tracing::warn!(device = %spec.name, timeout = ?self.timeout, "Timed out waiting for device");
                Err(HotmountError::DeviceTimeout {
                    device: spec.name.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::uevent::DeviceEventStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const SCSI_DEVPATH: &str =
        "/devices/pci0000:00/0000:00:05.0/virtio2/host0/target0:0:2/0:0:2:0/block/sda";

    /// Hands out one pre-wired stream and counts subscriptions.
    #[derive(Default)]
    struct ChannelMonitor {
        rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
        subscriptions: AtomicUsize,
    }

    impl ChannelMonitor {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<DeviceEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let monitor = Arc::new(Self {
                rx: Mutex::new(Some(rx)),
                subscriptions: AtomicUsize::new(0),
            });
            (monitor, tx)
        }
    }

    impl UeventMonitor for ChannelMonitor {
        fn subscribe(&self) -> HotmountResult<DeviceEventStream> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let mut rx = self
                .rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| HotmountError::Internal("already subscribed".into()))?;
            Ok(Box::pin(async_stream::stream! {
                while let Some(event) = rx.recv().await {
                    yield event;
                }
            }))
        }
    }

    fn config_in(root: &std::path::Path, timeout_ms: u64) -> StorageConfig {
        StorageConfig {
            dev_root: root.join("dev"),
            scsi_probe_path: root.join("sys/class/scsi_device/0:0:0:0"),
            device_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_scsi_wait_name() {
        let spec = DeviceWaitSpec::scsi("2:0");
        assert_eq!(spec.name, "0:2:0/block");
        assert_eq!(spec.mode, AddressingMode::Scsi);
    }

    #[test]
    fn test_scsi_matches_substring() {
        let spec = DeviceWaitSpec::scsi("2:0");
        assert!(spec.matches(&DeviceEvent::block_add(SCSI_DEVPATH)));

        // Different LUN
        let other = SCSI_DEVPATH.replace("0:0:2:0", "0:0:2:1");
        assert!(!spec.matches(&DeviceEvent::block_add(other)));

        // Right device, wrong action
        let remove = DeviceEvent {
            action: "remove".to_string(),
            ..DeviceEvent::block_add(SCSI_DEVPATH)
        };
        assert!(!spec.matches(&remove));
    }

    #[test]
    fn test_named_matches_exact_basename() {
        let spec = DeviceWaitSpec::named("vdb");
        assert!(spec.matches(&DeviceEvent::block_add(
            "/devices/pci0000:00/0000:00:06.0/virtio3/block/vdb"
        )));

        // Directory component equal to the name is not enough
        assert!(!spec.matches(&DeviceEvent::block_add("/devices/virtual/vdb/block/vdc")));
        // Prefix of a longer name
        assert!(!spec.matches(&DeviceEvent::block_add("/devices/virtio3/block/vdb1")));
        assert!(!spec.matches(&DeviceEvent::block_add("/devices/virtio3/block/xvdb")));
    }

    #[tokio::test]
    async fn test_fast_path_skips_subscription() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), 3000);
        std::fs::create_dir_all(&config.dev_root).unwrap();
        std::fs::write(config.dev_root.join("vdb"), b"").unwrap();

        let (monitor, _tx) = ChannelMonitor::new();
        let waiter = HotplugWaiter::new(&config, monitor.clone());
        waiter
            .wait_for_block_device(&DeviceWaitSpec::named("vdb"))
            .await
            .unwrap();
        assert_eq!(monitor.subscriptions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scsi_fast_path_uses_probe_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), 3000);
        std::fs::create_dir_all(&config.scsi_probe_path).unwrap();

        let (monitor, _tx) = ChannelMonitor::new();
        let waiter = HotplugWaiter::new(&config, monitor.clone());
        waiter
            .wait_for_block_device(&DeviceWaitSpec::scsi("2:0"))
            .await
            .unwrap();
        assert_eq!(monitor.subscriptions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_matching_event_completes_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), 3000);
        let (monitor, tx) = ChannelMonitor::new();
        let waiter = HotplugWaiter::new(&config, monitor.clone());

        tx.send(DeviceEvent::block_add("/devices/virtio3/block/vdc"))
            .unwrap();
        tx.send(DeviceEvent::block_add("/devices/virtio4/block/vdb"))
            .unwrap();

        waiter
            .wait_for_block_device(&DeviceWaitSpec::named("vdb"))
            .await
            .unwrap();
        assert_eq!(monitor.subscriptions.load(Ordering::SeqCst), 1);
        // Listener is gone, so the stream (and its receiver) was dropped.
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_match() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), 3000);
        let (monitor, tx) = ChannelMonitor::new();
        let waiter = HotplugWaiter::new(&config, monitor);

        tx.send(DeviceEvent::block_add("/devices/virtio3/block/vdc"))
            .unwrap();

        let err = waiter
            .wait_for_block_device(&DeviceWaitSpec::named("vdb"))
            .await
            .unwrap_err();
        match err {
            HotmountError::DeviceTimeout { device, timeout } => {
                assert_eq!(device, "vdb");
                assert_eq!(timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_stream_end_without_device_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), 3000);
        let (monitor, tx) = ChannelMonitor::new();
        let waiter = HotplugWaiter::new(&config, monitor);
        drop(tx);

        let err = waiter
            .wait_for_block_device(&DeviceWaitSpec::named("vdb"))
            .await
            .unwrap_err();
        assert!(matches!(err, HotmountError::Storage(_)));
    }
}
