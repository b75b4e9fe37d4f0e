use bitflags::bitflags;
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Buffer type
///
/// Streaming endpoints are either fed by the application (output) or read by it (capture).
/// The discriminants match the kernel's `v4l2_buf_type`.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    VideoCapture        = 1,
    VideoOutput         = 2,
}

impl Type {
    /// Name of the streaming role this buffer type plays on a loopback device
    pub fn role(self) -> &'static str {
        match self {
            Type::VideoOutput => "Source",
            Type::VideoCapture => "Sink",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::VideoCapture => write!(f, "video capture"),
            Type::VideoOutput => write!(f, "video output"),
        }
    }
}

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        /// Buffer is mapped
        const MAPPED                = 0x00000001;
        /// Buffer is queued for processing
        const QUEUED                = 0x00000002;
        /// Buffer is ready
        const DONE                  = 0x00000004;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        /// Timestamp type
        const TIMESTAMP_MONOTONIC   = 0x00002000;
        const TIMESTAMP_COPY        = 0x00004000;
        /// Last buffer produced by the hardware
        const LAST                  = 0x00100000;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Buffer metadata, mostly used not to convolute the main buffer structs
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Number of bytes occupied by the data in the buffer
    pub bytesused: u32,
    /// Buffer flags
    pub flags: Flags,
    /// Field order, zero (any) unless the format is interlaced
    pub field: u32,
    /// Sequence number, counting the frames
    pub sequence: u32,
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq {} bytesused {} field {} flags {}",
            self.sequence, self.bytesused, self.field, self.flags
        )
    }
}

/// Mapped frame buffer
///
/// The index is assigned once when the pool is set up and never changes. The memory region is
/// shared with the device; whether the application may touch it is decided by the stream that
/// owns the pool, so the accessors are crate private.
pub struct Buffer<R> {
    index: usize,
    region: R,
    pub meta: Metadata,
}

impl<R> Buffer<R>
where
    R: Deref<Target = [u8]>,
{
    pub(crate) fn new(index: usize, region: R) -> Self {
        Buffer {
            index,
            region,
            meta: Metadata::default(),
        }
    }

    /// Permanent identity of the buffer within its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size of the backing memory region
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Whether the backing memory region is empty
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.region
    }
}

impl<R> Buffer<R>
where
    R: DerefMut<Target = [u8]>,
{
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.region
    }
}

impl<R> fmt::Debug for Buffer<R>
where
    R: Deref<Target = [u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("len", &self.len())
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles() {
        assert_eq!(Type::VideoOutput.role(), "Source");
        assert_eq!(Type::VideoCapture.role(), "Sink");
        assert_eq!(Type::VideoOutput as u32, 2);
    }

    #[test]
    fn flags_keep_unknown_bits() {
        let flags = Flags::from(0x0000_2005);
        assert!(flags.contains(Flags::MAPPED | Flags::DONE));
        assert_eq!(u32::from(flags), 0x0000_2005);
    }

    #[test]
    fn buffer_reports_region_length() {
        let buf = Buffer::new(3, vec![0u8; 16]);
        assert_eq!(buf.index(), 3);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.meta, Metadata::default());
    }
}
