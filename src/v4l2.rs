//! Kernel video4linux devices
//!
//! Thin wrappers around the raw system calls plus a [`device::Device`] driver implementing the
//! streaming device interface on top of them.

mod api;
pub use api::*;

pub mod device;
pub mod vidioc;
