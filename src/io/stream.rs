use std::{io, time::Duration};

use tracing::{debug, info, warn};

use crate::buffer::{Metadata, Type};
use crate::config::EndpointConfig;
use crate::device::{Driver, Format, Geometry, Handle, Operation};
use crate::error::{Error, Result};
use crate::io::arena::Arena;
use crate::io::ownership::Ownership;
use crate::io::trace::{TraceHook, TraceRecord};
use crate::io::traits::{CaptureStream, OutputStream, Stream as StreamTrait};

/// Stream of mapped buffers, one endpoint of a streaming session
///
/// The stream owns the device handle, the mapped buffer pool and the ownership state of every
/// buffer. All transfers between application and device go through [`Stream::queue`] and
/// [`Stream::dequeue`], which refuse any transfer that would break the ownership discipline
/// before the device is involved.
pub struct Stream<H: Handle> {
    arena: Arena<H::Region>,
    ownership: Ownership,
    handle: H,
    typ: Type,
    name: String,
    format: Option<Format>,
    timeout: Option<Duration>,
    in_hand: Option<usize>,
    active: bool,
    trace: Option<TraceHook>,
}

impl<H: Handle> Stream<H> {
    /// Opens a device and sets up its buffer pool
    ///
    /// Output endpoints negotiate the configured format first. Capture endpoints accept the
    /// format the device already has. All buffers start out owned by the application.
    ///
    /// # Arguments
    ///
    /// * `driver` - Opens the device named in the config
    /// * `config` - Endpoint settings
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_loopback::buffer::Type;
    /// use v4l_loopback::config::EndpointConfig;
    /// use v4l_loopback::io::Stream;
    /// use v4l_loopback::loopback::Loopback;
    ///
    /// let dev = Loopback::new("loopback0");
    /// let cfg = EndpointConfig::new("loopback0", Type::VideoOutput);
    /// let stream = Stream::open(&dev, &cfg).unwrap();
    /// assert_eq!(stream.ownership().app_owned(), stream.len());
    /// ```
    pub fn open<D>(driver: &D, config: &EndpointConfig) -> Result<Self>
    where
        D: Driver<Handle = H>,
    {
        let typ = config.typ;
        let mut handle = driver
            .open(&config.name)
            .map_err(Error::device(typ, Operation::Open, None))?;

        let format = match (typ, config.format) {
            (Type::VideoOutput, Some(requested)) => {
                let format = handle
                    .negotiate_format(typ, &requested)
                    .map_err(Error::device(typ, Operation::NegotiateFormat, None))?;
                if (format.width, format.height, format.fourcc)
                    != (requested.width, requested.height, requested.fourcc)
                {
                    warn!(
                        device = %config.name,
                        requested = %requested.fourcc,
                        width = format.width,
                        height = format.height,
                        fourcc = %format.fourcc,
                        "device adjusted the requested format"
                    );
                }
                Some(format)
            }
            _ => None,
        };

        let arena = Arena::allocate(&mut handle, typ, config.buffers)?;
        if arena.len() != config.buffers as usize {
            debug!(
                device = %config.name,
                direction = typ.role(),
                requested = config.buffers,
                granted = arena.len(),
                "device changed the buffer count"
            );
        }
        info!(
            device = %config.name,
            direction = typ.role(),
            buffers = arena.len(),
            "endpoint ready"
        );

        Ok(Stream {
            ownership: Ownership::new(arena.len()),
            arena,
            handle,
            typ,
            name: config.name.clone(),
            format,
            timeout: config.timeout,
            in_hand: None,
            active: false,
            trace: None,
        })
    }

    /// Device node this stream was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer type, fixed at creation
    pub fn typ(&self) -> Type {
        self.typ
    }

    /// Number of buffers in the pool
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Format negotiated during setup, output streams only
    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Placement of buffer `index` in device memory
    pub fn geometry(&self, index: usize) -> Option<&Geometry> {
        self.arena.geometry(index)
    }

    /// Current buffer ownership
    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// Buffer held back from the device for reading, capture streams only
    pub fn in_hand(&self) -> Option<usize> {
        self.in_hand
    }

    /// Whether streaming has been started
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the device handle
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Sets a timeout for dequeue calls.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = Some(duration);
    }

    /// Clears the dequeue timeout, dequeue calls block until a buffer is ready.
    pub fn clear_timeout(&mut self) {
        self.timeout = None;
    }

    /// Receive a [`TraceRecord`] for every queue and dequeue of this stream
    pub fn set_trace_hook<F>(&mut self, hook: F)
    where
        F: FnMut(TraceRecord) + Send + 'static,
    {
        self.trace = Some(Box::new(hook));
    }

    pub fn clear_trace_hook(&mut self) {
        self.trace = None;
    }

    fn trace(&mut self, op: Operation, index: usize) {
        let record = TraceRecord {
            typ: self.typ,
            op,
            index,
        };
        record.emit();
        if let Some(hook) = self.trace.as_mut() {
            hook(record);
        }
    }

    /// Hand buffer `index` to the device
    ///
    /// Output buffers are submitted full: the used length is set to the buffer capacity. The
    /// buffer must be owned by the application, otherwise a protocol violation is returned and
    /// the device is not called. If the device rejects the buffer, it stays marked as device
    /// owned.
    pub fn queue(&mut self, index: usize) -> Result<()> {
        let typ = self.typ;
        self.ownership
            .mark_queued(index)
            .map_err(Error::violation(typ, Operation::Queue, index))?;

        let mut meta = Metadata::default();
        if let Some(buf) = self.arena.get_mut(index) {
            if typ == Type::VideoOutput {
                buf.meta.bytesused = buf.len() as u32;
                buf.meta.field = 0;
                meta = buf.meta;
            }
        }

        self.trace(Operation::Queue, index);
        self.handle
            .submit_buffer(typ, index as u32, &meta)
            .map_err(Error::device(typ, Operation::Queue, Some(index)))
    }

    /// Take the next completed buffer back from the device
    ///
    /// Blocks until the device returns a buffer or the timeout expires. The index handed back
    /// by the device must be one it owns, anything else is a protocol violation.
    pub fn dequeue(&mut self) -> Result<usize> {
        let typ = self.typ;
        let (index, meta) = self
            .handle
            .retrieve_buffer(typ, self.timeout)
            .map_err(Error::device(typ, Operation::Dequeue, None))?;
        let index = index as usize;

        self.trace(Operation::Dequeue, index);
        self.ownership
            .mark_dequeued(index)
            .map_err(Error::violation(typ, Operation::Dequeue, index))?;
        if let Some(buf) = self.arena.get_mut(index) {
            buf.meta = meta;
        }

        Ok(index)
    }

    /// Read access to an application owned buffer
    pub fn get(&self, index: usize) -> Result<&[u8]> {
        match self.arena.get(index) {
            Some(buf) if self.ownership.is_owned_by_app(index) => Ok(buf.data()),
            _ => Err(self.refuse_access(index)),
        }
    }

    /// Write access to an application owned buffer
    pub fn get_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        if !self.ownership.is_owned_by_app(index) {
            return Err(self.refuse_access(index));
        }
        match self.arena.get_mut(index) {
            Some(buf) => Ok(buf.data_mut()),
            None => Err(Error::violation(self.typ, Operation::Access, index)(
                self.ownership.owner(index),
            )),
        }
    }

    /// Metadata of an application owned buffer, as last reported by the device
    pub fn get_meta(&self, index: usize) -> Result<&Metadata> {
        match self.arena.get(index) {
            Some(buf) if self.ownership.is_owned_by_app(index) => Ok(&buf.meta),
            _ => Err(self.refuse_access(index)),
        }
    }

    fn refuse_access(&self, index: usize) -> Error {
        Error::violation(self.typ, Operation::Access, index)(self.ownership.owner(index))
    }

    /// Queue the next frame, see [`Stream::feed_with`]
    pub fn feed(&mut self) -> Result<usize> {
        self.feed_with(|_| ())
    }

    /// Fill a free buffer and queue it
    ///
    /// Picks the lowest buffer the application owns. When the device holds all of them, one is
    /// dequeued first (blocking) and reused, so no more than the pool size is ever in flight.
    /// Returns the index that was queued.
    pub fn feed_with<F>(&mut self, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]),
    {
        let index = match self.ownership.first_app_owned() {
            Some(index) => index,
            None => self.dequeue()?,
        };

        fill(self.get_mut(index)?);
        self.queue(index)?;
        Ok(index)
    }

    /// Queue every buffer but the last one, which is kept in hand
    ///
    /// Returns the buffer in hand. Needs at least two buffers, otherwise the device would never
    /// have anything to fill while the application reads. A smaller pool is reported as an
    /// [`io::ErrorKind::InvalidInput`] error on [`Operation::Access`] before any device call.
    pub fn prime(&mut self) -> Result<usize> {
        if self.len() < 2 {
            return Err(Error::device(self.typ, Operation::Access, None)(io::Error::new(
                io::ErrorKind::InvalidInput,
                "holding a buffer in hand requires at least two buffers",
            )));
        }

        let last = self.len() - 1;
        for index in 0..last {
            if self.ownership.is_owned_by_app(index) {
                self.queue(index)?;
            }
        }
        self.in_hand = Some(last);
        Ok(last)
    }

    /// Swap the buffer in hand for the next completed one
    ///
    /// The next buffer is dequeued first; only then is the previous one handed back, so the
    /// application always holds one stable buffer. Returns the new buffer in hand.
    pub fn drain(&mut self) -> Result<usize> {
        let previous = match self.in_hand {
            Some(index) => index,
            None => self.prime()?,
        };

        let next = self.dequeue()?;
        self.queue(previous)?;
        self.in_hand = Some(next);
        Ok(next)
    }
}

impl<H: Handle> Drop for Stream<H> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = StreamTrait::stop(self) {
                warn!(device = %self.name, error = %e, "failed to stop streaming");
            }
        }

        self.arena.release();
        if let Err(e) = self.handle.release_buffers(self.typ) {
            debug!(device = %self.name, error = %e, "failed to release buffers");
        }
    }
}

impl<H: Handle> StreamTrait for Stream<H> {
    fn start(&mut self) -> Result<()> {
        self.handle
            .start_streaming(self.typ)
            .map_err(Error::device(self.typ, Operation::StreamOn, None))?;
        self.active = true;
        info!(device = %self.name, direction = self.typ.role(), "streaming on");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.handle
            .stop_streaming(self.typ)
            .map_err(Error::device(self.typ, Operation::StreamOff, None))?;

        // the device gives up every queued buffer on stream off
        self.ownership.reset();
        self.in_hand = None;
        self.active = false;
        info!(device = %self.name, direction = self.typ.role(), "streaming off");
        Ok(())
    }
}

impl<H: Handle> CaptureStream for Stream<H> {
    fn queue(&mut self, index: usize) -> Result<()> {
        Stream::queue(self, index)
    }

    fn dequeue(&mut self) -> Result<usize> {
        Stream::dequeue(self)
    }

    fn get(&self, index: usize) -> Result<&[u8]> {
        Stream::get(self, index)
    }

    fn get_meta(&self, index: usize) -> Result<&Metadata> {
        Stream::get_meta(self, index)
    }

    fn next(&mut self) -> Result<usize> {
        if !self.active {
            if self.in_hand.is_none() {
                self.prime()?;
            }
            self.start()?;
        }

        self.drain()
    }
}

impl<H: Handle> OutputStream for Stream<H> {
    fn queue(&mut self, index: usize) -> Result<()> {
        Stream::queue(self, index)
    }

    fn dequeue(&mut self) -> Result<usize> {
        Stream::dequeue(self)
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        Stream::get_mut(self, index)
    }

    fn get_meta(&self, index: usize) -> Result<&Metadata> {
        Stream::get_meta(self, index)
    }

    fn next(&mut self) -> Result<usize> {
        let index = self.feed()?;
        if !self.active {
            self.start()?;
        }
        Ok(index)
    }
}
