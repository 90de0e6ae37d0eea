use std::ops::RangeInclusive;

use thiserror::Error;

use crate::Pointer;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error)]
pub enum Error {
    #[error("/proc/{0}/maps not found")]
    MemoryMapNotFound(u32),

    #[error("Path not convertible to UTF-8")]
    InvalidUTF8InPath,

    #[error("Could not convert PID {0} to pid_t")]
    InvalidPid(u32),

    #[error(
        "No permissions to read memory.  \
         Consider temporarily disabling ptrace_scope protections \
         with 'echo 0 | sudo tee /proc/sys/kernel/yama/ptrace_scope'"
    )]
    MemoryReadInsufficientPermission,

    #[error("Attempted memory access at nullptr")]
    MemoryReadNullPointer,

    #[error("Bad address {0} ({1} bytes) in target address space")]
    MemoryReadBadAddress(Pointer, usize),

    #[error(
        "Only {transferred} of {expected} bytes \
         could be transferred at {ptr}"
    )]
    PartialTransfer {
        ptr: Pointer,
        transferred: usize,
        expected: usize,
    },

    #[error("Error {err} accessing process memory.")]
    MemoryReadOther {
        #[source]
        err: nix::Error,
    },

    #[error("Pointer {0} cannot be offset by {1} bytes without overflow")]
    PointerOverflow(Pointer, isize),

    #[error("Range from {0} to {1} ends before it starts")]
    ReversedRange(Pointer, Pointer),

    #[error(
        "Index {index} is outside of the valid range \
         [{}, {}]",
        valid.start(),
        valid.end()
    )]
    IndexOutOfBounds {
        index: isize,
        valid: RangeInclusive<isize>,
    },

    #[error(
        "Pointer would move to {attempted}, \
         more than one element outside of [{first}, {last}]"
    )]
    PointerOutOfBounds {
        attempted: Pointer,
        first: Pointer,
        last: Pointer,
    },

    #[error("Allocation at {0} was used after being freed")]
    UseAfterFree(Pointer),

    #[error("Atomic access at {0} is not supported by this memory backend")]
    AtomicAccessUnsupported(Pointer),

    #[error("Misaligned atomic access at {0}")]
    MisalignedAtomic(Pointer),

    #[error(
        "Expected {expected} bytes to unpack a value, \
         but {provided} bytes were provided"
    )]
    UnexpectedByteCount { expected: usize, provided: usize },

    #[error("InvalidUTF8")]
    InvalidUTF8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Io {
        #[from]
        err: std::io::Error,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
