use std::io;

use thiserror::Error;

use crate::buffer::Type;
use crate::device::Operation;
use crate::io::ownership::Owner;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the streaming core
///
/// Device errors carry the error reported by the device. Protocol violations are defects in the
/// calling code: the buffer ownership bookkeeping was about to be broken, so the operation was
/// refused before anything reached the device.
#[derive(Debug, Error)]
pub enum Error {
    /// A device call failed, or the device's answer cannot be streamed with
    ///
    /// The latter covers pools the device left empty, overlapping or short buffers and sink
    /// pools too small to hold one buffer back; those carry a synthesized `io::Error`.
    #[error("{} {op}{}: {source}", .typ.role(), at(.index))]
    Device {
        typ: Type,
        op: Operation,
        index: Option<usize>,
        source: io::Error,
    },
    /// The buffer ownership discipline was about to be broken
    #[error("{} {op} index {index}: protocol violation, buffer is {owner}", .typ.role())]
    ProtocolViolation {
        typ: Type,
        op: Operation,
        index: usize,
        owner: Owner,
    },
}

fn at(index: &Option<usize>) -> String {
    match index {
        Some(index) => format!(" index {}", index),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn device(
        typ: Type,
        op: Operation,
        index: Option<usize>,
    ) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Device {
            typ,
            op,
            index,
            source,
        }
    }

    pub(crate) fn violation(typ: Type, op: Operation, index: usize) -> impl FnOnce(Owner) -> Self {
        move |owner| Error::ProtocolViolation {
            typ,
            op,
            index,
            owner,
        }
    }

    /// Whether the device refused or failed a call
    pub fn is_device(&self) -> bool {
        matches!(self, Error::Device { .. })
    }

    /// Whether the ownership discipline was violated
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::ProtocolViolation { .. })
    }

    /// Operation that failed
    pub fn operation(&self) -> Operation {
        match self {
            Error::Device { op, .. } | Error::ProtocolViolation { op, .. } => *op,
        }
    }

    /// Buffer involved in the failure, if known
    pub fn index(&self) -> Option<usize> {
        match self {
            Error::Device { index, .. } => *index,
            Error::ProtocolViolation { index, .. } => Some(*index),
        }
    }

    /// Kind of the underlying device error
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Device { source, .. } => Some(source.kind()),
            Error::ProtocolViolation { .. } => None,
        }
    }

    /// OS error code of the underlying device error
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Device { source, .. } => source.raw_os_error(),
            Error::ProtocolViolation { .. } => None,
        }
    }
}
