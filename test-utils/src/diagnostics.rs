//! Diagnostics hook that only counts calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use hotmount_guest::storage::diagnostics::DiagnosticsHook;
use hotmount_shared::errors::{HotmountError, HotmountResult};

#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dump fail, like a missing `lsblk`.
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(true),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosticsHook for RecordingDiagnostics {
    async fn dump(&self, _scsi_addr: &str) -> HotmountResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HotmountError::Storage("lsblk: command not found".into()));
        }
        Ok(())
    }
}
