use std::os::unix::io::RawFd;
use std::{io, mem, ptr, time::Duration};

fn make_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

/// Wait until `fd` becomes readable (or writable, for output devices)
///
/// Returns `false` if the timeout expired first.
pub fn wait(fd: RawFd, writable: bool, timeout: Duration) -> io::Result<bool> {
    let mut set = unsafe {
        let mut raw_fd_set = mem::MaybeUninit::<libc::fd_set>::uninit();
        libc::FD_ZERO(raw_fd_set.as_mut_ptr());
        raw_fd_set.assume_init()
    };
    unsafe { libc::FD_SET(fd, &mut set) };

    let (readfds, writefds): (*mut libc::fd_set, *mut libc::fd_set) = if writable {
        (ptr::null_mut(), &mut set)
    } else {
        (&mut set, ptr::null_mut())
    };
    let timeout = make_timespec(timeout);

    match unsafe { libc::pselect(fd + 1, readfds, writefds, ptr::null_mut(), &timeout, ptr::null()) }
    {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}
