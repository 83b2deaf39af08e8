//! Test fixtures for the Hotmount guest storage core.
//!
//! Everything here works without privileges: the kernel's `/dev` and sysfs
//! are temporary directory trees, the mount syscall is recorded instead of
//! executed, and uevents come from a script.

mod diagnostics;
mod fixture;
mod mounter;
mod uevent;

pub use diagnostics::RecordingDiagnostics;
pub use fixture::GuestFixture;
pub use mounter::{MountOp, RecordingMounter};
pub use uevent::{ScriptedEvent, ScriptedUeventMonitor};
