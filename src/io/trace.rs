use std::fmt;

use crate::buffer::Type;
use crate::device::Operation;

/// Target of the per-buffer trace events
pub const TARGET: &str = "v4l_loopback::trace";

/// One ownership transfer as seen by an endpoint
///
/// Records are emitted for every queue and dequeue, in the order the device calls are issued.
/// Replaying them reconstructs the buffer ownership of both endpoints at any point of a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub typ: Type,
    pub op: Operation,
    pub index: usize,
}

impl TraceRecord {
    pub(crate) fn emit(self) {
        tracing::debug!(
            target: TARGET,
            direction = self.typ.role(),
            op = %self.op,
            index = self.index,
            "{}",
            self
        );
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {:>5} index {}", self.typ.role(), self.op, self.index)
    }
}

/// Callback receiving the trace records of an endpoint
pub type TraceHook = Box<dyn FnMut(TraceRecord) + Send>;
