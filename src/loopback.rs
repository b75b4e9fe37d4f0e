//! In-process loopback device
//!
//! Frames submitted on the output side of a [`Loopback`] are delivered into buffers queued on its
//! capture side, the way the v4l2loopback kernel module connects a producer with its consumers.
//! Buffer memory is an anonymous shared mapping per direction; mapped regions alias it, nothing
//! is copied between application and device except the frame handover itself.
//!
//! Every call made on the device is recorded, and calls can be made to fail on demand, which
//! makes the loopback double as the collaborator for exercising the streaming core without
//! hardware.

use std::{
    collections::{HashMap, VecDeque},
    convert::TryFrom,
    fmt, io,
    ops::{Deref, DerefMut},
    ptr, slice,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use memmap2::{MmapMut, MmapOptions};
use tracing::trace;

use crate::buffer::{Flags, Metadata, Type};
use crate::device::{self, Driver, Format, Geometry};

/// Buffers granted per direction unless configured otherwise, same as v4l2loopback
pub const DEFAULT_MAX_BUFFERS: u32 = 2;

const PAGE_SIZE: u32 = 4096;

/// Calls recorded by the loopback device
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    Open,
    NegotiateFormat,
    RequestBuffers,
    QueryBuffer,
    Map,
    Unmap,
    Submit,
    Retrieve,
    StreamOn,
    StreamOff,
    Close,
}

/// Entry of the call log
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    pub call: Call,
    pub typ: Option<Type>,
    pub index: Option<u32>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.typ {
            Some(typ) => write!(f, "{:<6} {:?}", typ.role(), self.call)?,
            None => write!(f, "{:<6} {:?}", "", self.call)?,
        }
        if let Some(index) = self.index {
            write!(f, " index {}", index)?;
        }
        Ok(())
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Device memory backing the buffers of one direction
struct Memory {
    _map: MmapMut,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointer targets the mapping owned by the same struct, which lives as long as the
// struct does. Concurrent access to a buffer is excluded by the queue/dequeue protocol: the
// device only writes buffers it holds, the application only touches buffers it holds.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    fn new(len: usize) -> io::Result<Self> {
        let mut map = MmapOptions::new().len(len).map_anon()?;
        let ptr = map.as_mut_ptr();
        Ok(Memory {
            _map: map,
            ptr,
            len,
        })
    }
}

#[derive(Default)]
struct Queue {
    memory: Option<Arc<Memory>>,
    count: u32,
    length: u32,
    stride: u32,
    mapped: usize,
    /// buffers submitted by the application, oldest first
    queued: VecDeque<(u32, Metadata)>,
    /// buffers ready to be retrieved, oldest first
    done: VecDeque<(u32, Metadata)>,
    /// whether the device currently holds the buffer
    held: Vec<bool>,
    streaming: bool,
    sequence: u32,
}

impl Queue {
    fn allocate(&mut self, count: u32, length: u32) -> io::Result<()> {
        let stride = (length as u64 + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64 * PAGE_SIZE as u64;
        let stride = u32::try_from(stride).map_err(|_| errno(libc::EINVAL))?;
        let total = (stride as u64)
            .checked_mul(count as u64)
            .and_then(|total| usize::try_from(total).ok())
            .ok_or_else(|| errno(libc::EINVAL))?;
        let memory = Memory::new(total)?;

        *self = Queue {
            memory: Some(Arc::new(memory)),
            count,
            length,
            stride,
            held: vec![false; count as usize],
            ..Queue::default()
        };
        Ok(())
    }

    fn free(&mut self) {
        *self = Queue::default();
    }

    fn stop(&mut self) {
        self.streaming = false;
        self.queued.clear();
        self.done.clear();
        for held in self.held.iter_mut() {
            *held = false;
        }
    }

    fn offset(&self, index: u32) -> usize {
        index as usize * self.stride as usize
    }
}

struct State {
    format: Option<Format>,
    max_buffers: u32,
    output: Queue,
    capture: Queue,
    events: Vec<Event>,
    counts: HashMap<Call, usize>,
    faults: Vec<(Call, usize)>,
}

impl State {
    fn queue(&mut self, typ: Type) -> &mut Queue {
        match typ {
            Type::VideoOutput => &mut self.output,
            Type::VideoCapture => &mut self.capture,
        }
    }

    fn log(&mut self, call: Call, typ: Option<Type>, index: Option<u32>) -> usize {
        self.events.push(Event { call, typ, index });
        let count = self.counts.entry(call).or_insert(0);
        *count += 1;
        *count - 1
    }

    /// Log a call and fail it if a fault was injected for this invocation
    fn record(&mut self, call: Call, typ: Option<Type>, index: Option<u32>) -> io::Result<()> {
        let nth = self.log(call, typ, index);
        if let Some(pos) = self.faults.iter().position(|f| *f == (call, nth)) {
            self.faults.remove(pos);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {:?} failure", call),
            ));
        }
        Ok(())
    }

    /// Move frames from queued output buffers into queued capture buffers
    fn pump(&mut self) -> bool {
        let mut delivered = false;

        while self.output.streaming && self.capture.streaming {
            if self.output.queued.is_empty() || self.capture.queued.is_empty() {
                break;
            }
            let (out_index, out_meta) = match self.output.queued.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            let (cap_index, _) = match self.capture.queued.pop_front() {
                Some(entry) => entry,
                None => break,
            };

            let n = out_meta
                .bytesused
                .min(self.output.length)
                .min(self.capture.length);
            if let (Some(src), Some(dst)) = (&self.output.memory, &self.capture.memory) {
                let (src_off, dst_off) = (self.output.offset(out_index), self.capture.offset(cap_index));
                debug_assert!(src_off + n as usize <= src.len && dst_off + n as usize <= dst.len);
                // SAFETY: both buffers are held by the device, the ranges lie within their
                // mappings and the mappings are distinct.
                unsafe {
                    ptr::copy_nonoverlapping(src.ptr.add(src_off), dst.ptr.add(dst_off), n as usize);
                }
            }

            let cap_meta = Metadata {
                bytesused: n,
                flags: Flags::DONE | Flags::TIMESTAMP_COPY,
                field: out_meta.field,
                sequence: self.capture.sequence,
            };
            self.capture.sequence = self.capture.sequence.wrapping_add(1);
            self.capture.done.push_back((cap_index, cap_meta));

            let out_meta = Metadata {
                flags: Flags::DONE,
                sequence: self.output.sequence,
                ..out_meta
            };
            self.output.sequence = self.output.sequence.wrapping_add(1);
            self.output.done.push_back((out_index, out_meta));

            trace!(out_index, cap_index, bytes = n, "frame delivered");
            delivered = true;
        }

        delivered
    }
}

struct Shared {
    name: String,
    state: Mutex<State>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loopback device connecting one output to one capture stream
///
/// Clones refer to the same device.
///
/// # Example
///
/// ```
/// use v4l_loopback::device::Driver;
/// use v4l_loopback::loopback::{Call, Loopback};
///
/// let dev = Loopback::new("loopback0");
/// assert!(dev.open("loopback0").is_ok());
/// assert!(dev.open("loopback1").is_err());
/// assert_eq!(dev.count(Call::Open), 2);
/// ```
#[derive(Clone)]
pub struct Loopback {
    shared: Arc<Shared>,
}

impl Loopback {
    /// Returns a loopback device answering to `name`
    pub fn new<S: Into<String>>(name: S) -> Self {
        Loopback {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    format: None,
                    max_buffers: DEFAULT_MAX_BUFFERS,
                    output: Queue::default(),
                    capture: Queue::default(),
                    events: Vec::new(),
                    counts: HashMap::new(),
                    faults: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Name of the device node
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Upper bound of buffers granted per direction
    pub fn set_max_buffers(&self, count: u32) {
        self.shared.lock().max_buffers = count;
    }

    /// Format set by the output side, if any
    pub fn format(&self) -> Option<Format> {
        self.shared.lock().format
    }

    /// Make the `nth` (zero based) invocation of `call` fail
    pub fn fail_on(&self, call: Call, nth: usize) {
        self.shared.lock().faults.push((call, nth));
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<Event> {
        self.shared.lock().events.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.shared.lock();
        state.events.clear();
        state.counts.clear();
    }

    /// Number of times `call` was made
    pub fn count(&self, call: Call) -> usize {
        self.shared.lock().counts.get(&call).copied().unwrap_or(0)
    }

    /// Number of currently mapped buffers of a direction
    pub fn mapped(&self, typ: Type) -> usize {
        self.shared.lock().queue(typ).mapped
    }

    /// Number of buffers of a direction currently held by the device
    pub fn held(&self, typ: Type) -> usize {
        self.shared.lock().queue(typ).held.iter().filter(|h| **h).count()
    }
}

impl Driver for Loopback {
    type Handle = Handle;

    fn open(&self, name: &str) -> io::Result<Handle> {
        self.shared.lock().record(Call::Open, None, None)?;
        if name != self.shared.name {
            return Err(errno(libc::ENOENT));
        }

        Ok(Handle {
            shared: self.shared.clone(),
            typ: None,
        })
    }
}

/// Opened loopback device
///
/// Like a v4l2loopback opener, a handle turns into a writer or a reader with the first call that
/// names a buffer type, and refuses the other type from then on.
pub struct Handle {
    shared: Arc<Shared>,
    typ: Option<Type>,
}

impl Handle {
    fn bind(slot: &mut Option<Type>, typ: Type) -> io::Result<()> {
        match *slot {
            None => {
                *slot = Some(typ);
                Ok(())
            }
            Some(bound) if bound == typ => Ok(()),
            Some(_) => Err(errno(libc::EINVAL)),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.log(Call::Close, self.typ, None);
        if let Some(typ) = self.typ {
            let queue = state.queue(typ);
            queue.stop();
            if queue.mapped == 0 {
                queue.free();
            }
        }
        self.shared.ready.notify_all();
    }
}

impl device::Handle for Handle {
    type Region = Region;

    fn negotiate_format(&mut self, typ: Type, format: &Format) -> io::Result<Format> {
        let mut state = self.shared.lock();
        state.record(Call::NegotiateFormat, Some(typ), None)?;
        Handle::bind(&mut self.typ, typ)?;

        if typ == Type::VideoCapture {
            // readers get whatever the writer configured
            return state.format.ok_or_else(|| errno(libc::EINVAL));
        }
        if state.output.count > 0 {
            return Err(errno(libc::EBUSY));
        }

        let bpp = format.fourcc.bits_per_pixel().ok_or_else(|| errno(libc::EINVAL))?;
        let size = format.width as u64 * format.height as u64 * bpp as u64 / 8;
        // every buffer starts on a page boundary, its rounded size must stay addressable
        if size == 0 || size > (u32::MAX - (PAGE_SIZE - 1)) as u64 {
            return Err(errno(libc::EINVAL));
        }

        let format = Format {
            size: size as u32,
            ..*format
        };
        state.format = Some(format);
        Ok(format)
    }

    fn request_buffers(&mut self, typ: Type, count: u32) -> io::Result<u32> {
        let mut state = self.shared.lock();
        state.record(Call::RequestBuffers, Some(typ), None)?;
        Handle::bind(&mut self.typ, typ)?;

        let max = state.max_buffers;
        let format = state.format;
        let queue = state.queue(typ);
        if queue.streaming || queue.mapped > 0 {
            return Err(errno(libc::EBUSY));
        }
        if count == 0 {
            queue.free();
            return Ok(0);
        }

        let format = format.ok_or_else(|| errno(libc::EINVAL))?;
        let count = count.min(max);
        if count == 0 {
            queue.free();
            return Ok(0);
        }
        queue.allocate(count, format.size)?;
        Ok(count)
    }

    fn query_buffer(&mut self, typ: Type, index: u32) -> io::Result<Geometry> {
        let mut state = self.shared.lock();
        state.record(Call::QueryBuffer, Some(typ), Some(index))?;
        Handle::bind(&mut self.typ, typ)?;

        let queue = state.queue(typ);
        if index >= queue.count {
            return Err(errno(libc::EINVAL));
        }
        let offset = index
            .checked_mul(queue.stride)
            .ok_or_else(|| errno(libc::EINVAL))?;
        Ok(Geometry {
            offset,
            length: queue.length,
        })
    }

    fn map_buffer(&mut self, offset: u32, length: usize) -> io::Result<Region> {
        let typ = self.typ.ok_or_else(|| errno(libc::EINVAL))?;
        let mut state = self.shared.lock();

        let stride = state.queue(typ).stride;
        let index = if stride == 0 { None } else { Some(offset / stride) };
        state.record(Call::Map, Some(typ), index)?;

        let queue = state.queue(typ);
        let index = match index {
            Some(index) if offset % stride == 0 && index < queue.count => index,
            _ => return Err(errno(libc::EINVAL)),
        };
        if length > queue.length as usize {
            return Err(errno(libc::EINVAL));
        }
        let memory = queue.memory.clone().ok_or_else(|| errno(libc::EINVAL))?;
        queue.mapped += 1;

        Ok(Region {
            shared: self.shared.clone(),
            memory,
            typ,
            index,
            offset: offset as usize,
            len: length,
        })
    }

    fn submit_buffer(&mut self, typ: Type, index: u32, meta: &Metadata) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.record(Call::Submit, Some(typ), Some(index))?;
        Handle::bind(&mut self.typ, typ)?;

        let queue = state.queue(typ);
        if index >= queue.count || queue.held[index as usize] {
            return Err(errno(libc::EINVAL));
        }

        let mut meta = *meta;
        if typ == Type::VideoOutput {
            if meta.bytesused > queue.length {
                return Err(errno(libc::EINVAL));
            }
            if meta.bytesused == 0 {
                meta.bytesused = queue.length;
            }
        }
        meta.flags = Flags::QUEUED;

        queue.held[index as usize] = true;
        queue.queued.push_back((index, meta));
        if state.pump() {
            self.shared.ready.notify_all();
        }
        Ok(())
    }

    fn retrieve_buffer(
        &mut self,
        typ: Type,
        timeout: Option<Duration>,
    ) -> io::Result<(u32, Metadata)> {
        let mut state = self.shared.lock();
        state.record(Call::Retrieve, Some(typ), None)?;
        Handle::bind(&mut self.typ, typ)?;

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let queue = state.queue(typ);
            if !queue.streaming {
                return Err(errno(libc::EINVAL));
            }
            if let Some((index, meta)) = queue.done.pop_front() {
                queue.held[index as usize] = false;
                return Ok((index, meta));
            }

            state = match deadline {
                None => self
                    .shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "no buffer ready before timeout",
                        ));
                    }
                    self.shared
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn start_streaming(&mut self, typ: Type) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.record(Call::StreamOn, Some(typ), None)?;
        Handle::bind(&mut self.typ, typ)?;

        let queue = state.queue(typ);
        if queue.count == 0 {
            return Err(errno(libc::EINVAL));
        }
        queue.streaming = true;
        state.pump();
        self.shared.ready.notify_all();
        Ok(())
    }

    fn stop_streaming(&mut self, typ: Type) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.record(Call::StreamOff, Some(typ), None)?;
        Handle::bind(&mut self.typ, typ)?;

        state.queue(typ).stop();
        self.shared.ready.notify_all();
        Ok(())
    }
}

/// Buffer memory of a loopback device mapped into the application
///
/// Dropping the region unmaps it.
pub struct Region {
    shared: Arc<Shared>,
    memory: Arc<Memory>,
    typ: Type,
    index: u32,
    offset: usize,
    len: usize,
}

impl Deref for Region {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the range was validated against the mapping when the region was created and
        // the mapping lives as long as `memory`.
        unsafe { slice::from_raw_parts(self.memory.ptr.add(self.offset), self.len) }
    }
}

impl DerefMut for Region {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see Deref, exclusive access follows from the buffer ownership protocol.
        unsafe { slice::from_raw_parts_mut(self.memory.ptr.add(self.offset), self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.log(Call::Unmap, Some(self.typ), Some(self.index));
        let queue = state.queue(self.typ);
        queue.mapped = queue.mapped.saturating_sub(1);
    }
}
