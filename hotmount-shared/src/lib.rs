//! Hotmount shared code.
//!
//! Error type and fixed constants used by the guest storage core, its
//! binary front-end and the test fixtures.

pub mod constants;
pub mod errors;

pub use errors::{HotmountError, HotmountResult};
