use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::{io, path::Path, ptr};

use crate::v4l2::vidioc;

fn check(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Opens a device node, returning its file descriptor
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<c_int> {
    let path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    check(unsafe { libc::open(path.as_ptr(), flags) })
}

pub fn close(fd: c_int) -> io::Result<()> {
    check(unsafe { libc::close(fd) }).map(|_| ())
}

/// Issues a video4linux request
///
/// Goes through `syscall` since the `ioctl` request type differs between libc flavours.
///
/// # Safety
///
/// `argp` must point to the argument type `request` expects.
pub unsafe fn ioctl(fd: c_int, request: vidioc::_IOC_TYPE, argp: *mut c_void) -> io::Result<()> {
    check(libc::syscall(libc::SYS_ioctl, fd, request, argp) as c_int).map(|_| ())
}

/// Maps `length` bytes of device memory at `offset`, shared with the device
///
/// # Safety
///
/// The returned pointer is only valid until it is passed to [`munmap`].
pub unsafe fn mmap(length: usize, fd: c_int, offset: libc::off_t) -> io::Result<*mut c_void> {
    let ret = libc::mmap(
        ptr::null_mut(),
        length,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        fd,
        offset,
    );
    if ret == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// # Safety
///
/// `start` must be a pointer returned by [`mmap`] for the same length.
pub unsafe fn munmap(start: *mut c_void, length: usize) -> io::Result<()> {
    check(libc::munmap(start, length)).map(|_| ())
}
