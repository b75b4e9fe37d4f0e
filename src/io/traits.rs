use crate::buffer::Metadata;
use crate::error::Result;

/// Streaming I/O
pub trait Stream {
    /// Start streaming, the device begins processing queued buffers
    fn start(&mut self) -> Result<()>;

    /// Stop streaming, the device returns all buffers to the application
    fn stop(&mut self) -> Result<()>;
}

pub trait CaptureStream: Stream {
    /// Insert a buffer into the drivers' incoming queue
    fn queue(&mut self, index: usize) -> Result<()>;

    /// Remove a buffer from the drivers' outgoing queue
    fn dequeue(&mut self) -> Result<usize>;

    /// Get the buffer at the specified index
    fn get(&self, index: usize) -> Result<&[u8]>;

    /// Get the metadata at the specified index
    fn get_meta(&self, index: usize) -> Result<&Metadata>;

    /// Fetch a new frame by first dequeueing and then requeueing the frame held so far.
    /// Returns the index of the buffer now in hand.
    /// First time initialization is performed if necessary.
    fn next(&mut self) -> Result<usize>;
}

pub trait OutputStream: Stream {
    /// Insert a buffer into the drivers' incoming queue
    fn queue(&mut self, index: usize) -> Result<()>;

    /// Remove a buffer from the drivers' outgoing queue
    fn dequeue(&mut self) -> Result<usize>;

    /// Get the buffer at the specified index
    fn get_mut(&mut self, index: usize) -> Result<&mut [u8]>;

    /// Get the metadata at the specified index
    fn get_meta(&self, index: usize) -> Result<&Metadata>;

    /// Queue a free frame, dequeueing one first if the device holds all of them.
    /// Returns the index of the queued buffer.
    /// First time initialization is performed if necessary.
    fn next(&mut self) -> Result<usize>;
}
