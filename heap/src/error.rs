//! Fatal error channel.
//!
//! Every variant describes a condition the heap cannot recover from. A heap
//! that returned one of these refuses further work (see
//! [`Heap`](crate::Heap)), and the process-wide heap turns them into a panic
//! through [`fatal`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeapError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("could not reserve a heap region of {size} bytes")]
    ReserveFailed { size: usize },

    #[error(
        "heap exhausted: {requested} bytes requested, {available} bytes left in region"
    )]
    OutOfMemory { requested: usize, available: usize },

    #[error("root set exhausted: could not grow past {len} entries")]
    RootSetExhausted { len: usize },

    #[error("double free of block at {addr:#x}")]
    DoubleFree { addr: usize },

    #[error("{addr:#x} does not point at a heap block")]
    InvalidPointer { addr: usize },

    #[error("block at {addr:#x} is not allocated")]
    NotAllocated { addr: usize },

    #[error("block at {addr:#x} has no layout")]
    MissingLayout { addr: usize },

    #[error("offset {offset} is not a pointer field of the object at {addr:#x}")]
    NotAPointerField { addr: usize, offset: usize },

    #[error("heap corrupted at {addr:#x}: {reason}")]
    Corrupted { reason: &'static str, addr: usize },

    #[error("root set not drained after collection ({remaining} entries left)")]
    RootsNotDrained { remaining: usize },

    #[error("invalid heap settings: {0}")]
    InvalidSettings(&'static str),

    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),

    #[error("heap is poisoned by an earlier fatal error")]
    Poisoned,
}

/// Report a fatal heap error and stop.
#[cold]
#[track_caller]
pub fn fatal(err: HeapError) -> ! {
    log::error!("fatal heap error: {err}");
    panic!("fatal heap error: {err}")
}
