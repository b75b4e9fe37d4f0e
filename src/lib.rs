//! Ownership-checked streaming I/O for video4linux loopback devices
//!
//! A loopback device connects a source, which writes frames into output buffers, with a sink,
//! which reads them from capture buffers. Both sides share a fixed pool of memory mapped buffers
//! with the device and pass them back and forth with queue and dequeue calls. At any time a
//! buffer is owned either by the application or by the device; [`io::Stream`] keeps track of
//! which and refuses every call that would hand out or touch a buffer the application does not
//! own.
//!
//! The device itself is abstracted by the [`device::Driver`] and [`device::Handle`] traits.
//! [`loopback::Loopback`] implements them in process, the `v4l2` feature adds kernel devices.

#[cfg(feature = "v4l2")]
pub use v4l2_sys as v4l_sys;

#[cfg(feature = "v4l2")]
pub mod v4l2;

#[cfg(feature = "v4l2")]
pub mod memory;

#[cfg(feature = "v4l2")]
mod pselect;

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod io;
pub mod loopback;
pub mod session;

mod fourcc;
pub use fourcc::FourCC;

pub use error::{Error, Result};

pub mod prelude;
