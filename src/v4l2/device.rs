use std::{io, mem, slice, time::Duration};

use tracing::debug;

use crate::buffer::{Metadata, Type};
use crate::device::{self, Driver, Format, Geometry};
use crate::memory::{Memory, Mmap};
use crate::pselect;
use crate::v4l2;
use crate::v4l_sys::*;
use crate::FourCC;

/// Opens video4linux device nodes, e.g. the ones created by the v4l2loopback module
///
/// # Example
///
/// ```
/// use v4l_loopback::device::Driver;
/// use v4l_loopback::v4l2::device::Device;
///
/// if let Ok(handle) = Device.open("/dev/video0") {
///     println!("opened fd {}", handle.fd());
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Device;

impl Driver for Device {
    type Handle = Handle;

    fn open(&self, name: &str) -> io::Result<Handle> {
        let fd = v4l2::open(name, libc::O_RDWR)?;
        debug!(device = name, fd, "opened device node");
        Ok(Handle { fd })
    }
}

/// Device handle
///
/// The file descriptor is closed when the handle is dropped.
pub struct Handle {
    fd: std::os::raw::c_int,
}

impl Handle {
    /// Returns the raw file descriptor
    pub fn fd(&self) -> std::os::raw::c_int {
        self.fd
    }

    fn buffer_desc(typ: Type) -> v4l2_buffer {
        v4l2_buffer {
            type_: typ as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // ignore errors
        let _ = v4l2::close(self.fd);
    }
}

impl device::Handle for Handle {
    type Region = Mmap<'static>;

    fn negotiate_format(&mut self, typ: Type, format: &Format) -> io::Result<Format> {
        let mut v4l2_fmt = v4l2_format {
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };

        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_G_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            v4l2_fmt.fmt.pix.width = format.width;
            v4l2_fmt.fmt.pix.height = format.height;
            v4l2_fmt.fmt.pix.pixelformat = format.fourcc.into();

            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let pix = unsafe { v4l2_fmt.fmt.pix };
        Ok(Format {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from(pix.pixelformat),
            size: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, typ: Type, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs = v4l2_requestbuffers {
            count,
            type_: typ as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut v4l2_reqbufs as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok(v4l2_reqbufs.count)
    }

    fn query_buffer(&mut self, typ: Type, index: u32) -> io::Result<Geometry> {
        let mut v4l2_buf = v4l2_buffer {
            index,
            ..Handle::buffer_desc(typ)
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok(Geometry {
            offset: unsafe { v4l2_buf.m.offset },
            length: v4l2_buf.length,
        })
    }

    fn map_buffer(&mut self, offset: u32, length: usize) -> io::Result<Mmap<'static>> {
        unsafe {
            let ptr = v4l2::mmap(length, self.fd, offset as libc::off_t)?;
            Ok(Mmap(slice::from_raw_parts_mut(ptr as *mut u8, length)))
        }
    }

    fn submit_buffer(&mut self, typ: Type, index: u32, meta: &Metadata) -> io::Result<()> {
        let mut v4l2_buf = v4l2_buffer {
            index,
            bytesused: meta.bytesused,
            field: meta.field,
            ..Handle::buffer_desc(typ)
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn retrieve_buffer(
        &mut self,
        typ: Type,
        timeout: Option<Duration>,
    ) -> io::Result<(u32, Metadata)> {
        if let Some(timeout) = timeout {
            // output buffers become available for dequeueing when the fd is writable
            if !pselect::wait(self.fd, typ == Type::VideoOutput, timeout)? {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF"));
            }
        }

        let mut v4l2_buf = Handle::buffer_desc(typ);
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok((
            v4l2_buf.index,
            Metadata {
                bytesused: v4l2_buf.bytesused,
                flags: v4l2_buf.flags.into(),
                field: v4l2_buf.field,
                sequence: v4l2_buf.sequence,
            },
        ))
    }

    fn start_streaming(&mut self, typ: Type) -> io::Result<()> {
        unsafe {
            let mut typ = typ as u32;
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn stop_streaming(&mut self, typ: Type) -> io::Result<()> {
        unsafe {
            let mut typ = typ as u32;
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }
}
