pub use crate::buffer::Type;
pub use crate::config::{EndpointConfig, SessionConfig};
pub use crate::device::{Driver, Format, Handle};
pub use crate::io::traits::{CaptureStream, OutputStream, Stream as _};
pub use crate::io::Stream as MmapStream;
pub use crate::loopback::Loopback;
pub use crate::session::Session;
pub use crate::FourCC;

#[cfg(feature = "v4l2")]
pub use crate::v4l2::device::Device;
