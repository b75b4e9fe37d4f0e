use std::ops::{Deref, DerefMut};

use crate::v4l2;

/// Memory used for buffer exchange, only device mapped buffers are streamed
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap = 1,
}

/// Memory-mapped region
///
/// The backing memory belongs to the device and is mapped into the address space of the
/// application, nothing is copied. Whoever holds the region may only touch it while the buffer
/// is owned by the application.
///
/// The destructor automatically unmaps the memory.
pub struct Mmap<'a>(pub(crate) &'a mut [u8]);

impl Drop for Mmap<'_> {
    fn drop(&mut self) {
        unsafe {
            // ignore errors
            let _ = v4l2::munmap(self.0.as_mut_ptr() as *mut core::ffi::c_void, self.0.len());
        }
    }
}

impl Deref for Mmap<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for Mmap<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}
