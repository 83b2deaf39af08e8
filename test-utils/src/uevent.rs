//! Scripted uevent source.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hotmount_guest::storage::uevent::{DeviceEvent, DeviceEventStream, UeventMonitor};
use hotmount_shared::errors::HotmountResult;
use parking_lot::Mutex;

/// An event delivered `after` the previous one.
///
/// `creates` are made on disk right before the event is yielded, the way the
/// kernel populates `/dev` and sysfs before broadcasting.
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub after: Duration,
    pub event: DeviceEvent,
    pub creates: Vec<PathBuf>,
}

impl ScriptedEvent {
    pub fn new(after: Duration, event: DeviceEvent) -> Self {
        Self {
            after,
            event,
            creates: Vec::new(),
        }
    }

    /// Create `path` (as a directory) before delivering the event.
    pub fn creating(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates.push(path.into());
        self
    }
}

/// Replays a script to every subscriber, then stays silent like an idle
/// netlink socket.
#[derive(Debug, Default)]
pub struct ScriptedUeventMonitor {
    script: Mutex<Vec<ScriptedEvent>>,
    subscriptions: AtomicUsize,
    live: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedUeventMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ScriptedEvent) {
        self.script.lock().push(event);
    }

    /// Number of `subscribe` calls so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscriptions whose stream has not been dropped yet.
    pub fn live_subscriptions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl UeventMonitor for ScriptedUeventMonitor {
    fn subscribe(&self) -> HotmountResult<DeviceEventStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());
        let script = self.script.lock().clone();

        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            for scripted in script {
                tokio::time::sleep(scripted.after).await;
                for path in &scripted.creates {
                    let _ = std::fs::create_dir_all(path);
                }
                yield scripted.event;
            }
            futures::future::pending::<()>().await;
        }))
    }
}
