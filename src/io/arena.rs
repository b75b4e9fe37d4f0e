use std::{io, ops::DerefMut};

use tracing::debug;

use crate::buffer::{Buffer, Type};
use crate::device::{Geometry, Handle, Operation};
use crate::error::{Error, Result};

/// Manage mapped buffers
///
/// The arena owns every mapped region of an endpoint. Regions unmap themselves when dropped, so
/// releasing the arena (or failing half way through allocation) never leaks a mapping.
pub struct Arena<R> {
    bufs: Vec<Buffer<R>>,
    geometry: Vec<Geometry>,
    typ: Type,
}

impl<R> Arena<R>
where
    R: DerefMut<Target = [u8]>,
{
    /// Requests and maps buffers
    ///
    /// The device may grant fewer buffers than requested; its answer is authoritative. If any
    /// query or mapping fails, all regions mapped so far are unmapped before the error is
    /// returned.
    ///
    /// # Arguments
    ///
    /// * `handle` - Device to allocate the buffers on
    /// * `typ` - Type of the buffers
    /// * `count` - Desired number of buffers
    pub fn allocate<H>(handle: &mut H, typ: Type, count: u32) -> Result<Self>
    where
        H: Handle<Region = R>,
    {
        let count = handle
            .request_buffers(typ, count)
            .map_err(Error::device(typ, Operation::RequestBuffers, None))?;
        if count == 0 {
            return Err(Error::device(typ, Operation::RequestBuffers, None)(
                io::Error::new(io::ErrorKind::Other, "device granted no buffers"),
            ));
        }

        let mut arena = Arena {
            bufs: Vec::with_capacity(count as usize),
            geometry: Vec::with_capacity(count as usize),
            typ,
        };

        for index in 0..count {
            let at = Some(index as usize);
            let geometry = handle
                .query_buffer(typ, index)
                .map_err(Error::device(typ, Operation::QueryBuffer, at))?;

            if arena.geometry.iter().any(|g| g.overlaps(&geometry)) {
                return Err(Error::device(typ, Operation::QueryBuffer, at)(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "buffer overlaps a previously mapped buffer",
                )));
            }

            let region = handle
                .map_buffer(geometry.offset, geometry.length as usize)
                .map_err(Error::device(typ, Operation::MapBuffer, at))?;
            if region.len() != geometry.length as usize {
                return Err(Error::device(typ, Operation::MapBuffer, at)(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "mapped {} bytes, device reported {}",
                        region.len(),
                        geometry.length
                    ),
                )));
            }

            debug!(
                direction = typ.role(),
                index,
                offset = geometry.offset,
                length = geometry.length,
                "mapped buffer"
            );
            arena.bufs.push(Buffer::new(index as usize, region));
            arena.geometry.push(geometry);
        }

        Ok(arena)
    }

    /// Unmap all buffers
    pub fn release(&mut self) {
        if !self.bufs.is_empty() {
            debug!(direction = self.typ.role(), count = self.bufs.len(), "unmapping buffers");
        }
        self.bufs.clear();
        self.geometry.clear();
    }

    /// Number of buffers in the pool
    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Placement of buffer `index` in device memory
    pub fn geometry(&self, index: usize) -> Option<&Geometry> {
        self.geometry.get(index)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Buffer<R>> {
        self.bufs.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Buffer<R>> {
        self.bufs.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Metadata;
    use crate::device::Format;
    use std::time::Duration;

    /// Hands out heap regions, optionally failing the nth mapping
    struct Fake {
        granted: u32,
        length: u32,
        stride: u32,
        fail_map: Option<u32>,
        maps: u32,
    }

    impl Fake {
        fn new(granted: u32) -> Self {
            Fake {
                granted,
                length: 64,
                stride: 64,
                fail_map: None,
                maps: 0,
            }
        }
    }

    impl Handle for Fake {
        type Region = Vec<u8>;

        fn negotiate_format(&mut self, _: Type, format: &Format) -> io::Result<Format> {
            Ok(*format)
        }

        fn request_buffers(&mut self, _: Type, count: u32) -> io::Result<u32> {
            Ok(count.min(self.granted))
        }

        fn query_buffer(&mut self, _: Type, index: u32) -> io::Result<Geometry> {
            Ok(Geometry {
                offset: index * self.stride,
                length: self.length,
            })
        }

        fn map_buffer(&mut self, _offset: u32, length: usize) -> io::Result<Vec<u8>> {
            let n = self.maps;
            self.maps += 1;
            if self.fail_map == Some(n) {
                return Err(io::Error::from_raw_os_error(libc::ENOMEM));
            }
            Ok(vec![0; length])
        }

        fn submit_buffer(&mut self, _: Type, _: u32, _: &Metadata) -> io::Result<()> {
            Ok(())
        }

        fn retrieve_buffer(&mut self, _: Type, _: Option<Duration>) -> io::Result<(u32, Metadata)> {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }

        fn start_streaming(&mut self, _: Type) -> io::Result<()> {
            Ok(())
        }

        fn stop_streaming(&mut self, _: Type) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn device_count_is_authoritative() {
        let mut dev = Fake::new(2);
        let arena = Arena::allocate(&mut dev, Type::VideoOutput, 4).unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(1).unwrap().index(), 1);
        assert_eq!(arena.get(1).unwrap().len(), 64);
        assert_eq!(arena.geometry(1).unwrap().offset, 64);
    }

    #[test]
    fn zero_buffers_is_an_error() {
        let mut dev = Fake::new(0);
        let err = Arena::allocate(&mut dev, Type::VideoCapture, 2)
            .err()
            .unwrap();
        assert_eq!(err.operation(), Operation::RequestBuffers);
    }

    #[test]
    fn map_failure_reports_index() {
        let mut dev = Fake::new(3);
        dev.fail_map = Some(1);
        let err = Arena::allocate(&mut dev, Type::VideoOutput, 3)
            .err()
            .unwrap();
        assert!(err.is_device());
        assert_eq!(err.operation(), Operation::MapBuffer);
        assert_eq!(err.index(), Some(1));
        assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
    }

    #[test]
    fn overlapping_buffers_are_refused() {
        let mut dev = Fake::new(2);
        dev.stride = 32;
        let err = Arena::allocate(&mut dev, Type::VideoOutput, 2)
            .err()
            .unwrap();
        assert_eq!(err.index(), Some(1));
        assert_eq!(err.kind(), Some(io::ErrorKind::InvalidData));
        assert_eq!(dev.maps, 1);
    }

    #[test]
    fn release_empties_the_pool() {
        let mut dev = Fake::new(2);
        let mut arena = Arena::allocate(&mut dev, Type::VideoOutput, 2).unwrap();
        arena.release();
        assert!(arena.is_empty());
        assert!(arena.get(0).is_none());
    }
}
