use std::{
    fmt, io,
    ops::DerefMut,
    time::Duration,
};

use crate::buffer::{Metadata, Type};
use crate::fourcc::FourCC;

/// Image format as negotiated with a device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,
    /// bytes required to hold one frame, filled in by the device
    pub size: u32,
}

impl Format {
    /// Returns a format description
    ///
    /// The frame size is left at zero, the device reports it during negotiation.
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_loopback::{device::Format, FourCC};
    /// let fmt = Format::new(800, 600, FourCC::YU12);
    /// ```
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            size: 0,
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::new(800, 600, FourCC::YU12)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width  : {}", self.width)?;
        writeln!(f, "height : {}", self.height)?;
        writeln!(f, "fourcc : {}", self.fourcc)?;
        writeln!(f, "size   : {}", self.size)?;
        Ok(())
    }
}

/// Placement of a single buffer within the device memory
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// offset to pass to the mapping call
    pub offset: u32,
    /// length of the buffer in bytes
    pub length: u32,
}

impl Geometry {
    /// Whether the two buffers would share any byte of device memory
    pub fn overlaps(&self, other: &Geometry) -> bool {
        let (a, b) = (self.offset as u64, other.offset as u64);
        a < b + other.length as u64 && b < a + self.length as u64
    }
}

/// Device calls issued by the streaming core
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    Open,
    NegotiateFormat,
    RequestBuffers,
    QueryBuffer,
    MapBuffer,
    Queue,
    Dequeue,
    Access,
    StreamOn,
    StreamOff,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::NegotiateFormat => "S_FMT",
            Operation::RequestBuffers => "REQBUFS",
            Operation::QueryBuffer => "QUERYBUF",
            Operation::MapBuffer => "mmap",
            Operation::Queue => "QBUF",
            Operation::Dequeue => "DQBUF",
            Operation::Access => "access",
            Operation::StreamOn => "STREAMON",
            Operation::StreamOff => "STREAMOFF",
        };
        f.pad(name)
    }
}

/// Opens handles to streaming devices
pub trait Driver {
    type Handle: Handle;

    /// Open the device node identified by `name`
    fn open(&self, name: &str) -> io::Result<Self::Handle>;
}

/// Control surface of an opened streaming device
///
/// The handle is closed when it is dropped. Every call maps onto one kernel request for real
/// video4linux nodes; the in-process loopback implements the same semantics.
pub trait Handle {
    /// Memory mapped view of a device buffer, unmapped on drop
    type Region: DerefMut<Target = [u8]>;

    /// Apply a format to the given buffer type and return what the device settled on
    fn negotiate_format(&mut self, typ: Type, format: &Format) -> io::Result<Format>;

    /// Ask for `count` buffers, returns the number the device actually allocated
    ///
    /// A count of zero frees all buffers.
    fn request_buffers(&mut self, typ: Type, count: u32) -> io::Result<u32>;

    /// Query where buffer `index` lives in device memory
    fn query_buffer(&mut self, typ: Type, index: u32) -> io::Result<Geometry>;

    /// Map a buffer previously described by [`Handle::query_buffer`]
    fn map_buffer(&mut self, offset: u32, length: usize) -> io::Result<Self::Region>;

    /// Hand buffer `index` to the device
    fn submit_buffer(&mut self, typ: Type, index: u32, meta: &Metadata) -> io::Result<()>;

    /// Take the next completed buffer back from the device
    ///
    /// Blocks until one is available. With a timeout, an error of kind
    /// [`io::ErrorKind::TimedOut`] is returned once it expires.
    fn retrieve_buffer(
        &mut self,
        typ: Type,
        timeout: Option<Duration>,
    ) -> io::Result<(u32, Metadata)>;

    /// Start streaming
    fn start_streaming(&mut self, typ: Type) -> io::Result<()>;

    /// Stop streaming, the device gives up all queued buffers
    fn stop_streaming(&mut self, typ: Type) -> io::Result<()>;

    /// Free all buffers
    fn release_buffers(&mut self, typ: Type) -> io::Result<()> {
        self.request_buffers(typ, 0).map(|_| ())
    }
}
