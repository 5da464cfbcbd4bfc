//! The error taxonomy of §7, surfaced by every entry point in
//! [`crate::heap::Heap`].
//!
//! Grounded on `mmtk-core`'s style: a plain enum with a hand-written
//! `Display` impl rather than a `thiserror`/`anyhow` derive — this crate
//! does not depend on either.

use std::fmt;

/// The outcome of a failed allocator operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Null allocator, zero size where non-zero is required, a pointer not
    /// previously returned by this allocator, or a double free.
    InvalidArgument,
    /// Heap growth was impossible, no free block was found after a retry, or
    /// a mapping could not be acquired for resource reasons (ENOMEM-class).
    OutOfMemory,
    /// A mapping could not be acquired or released for non-resource reasons
    /// (the OS refused the call outright).
    IoMappingFailed,
    /// The pointer lies outside any managed region, is misaligned, or its
    /// header fails a structural check that runs before the magic check.
    /// Recoverable: the pointer is simply not one of ours.
    NotOurBlock,
    /// The pointer lies inside a managed region but its magic or canary
    /// checks failed.
    CorruptBlock,
    /// A block's recorded size would extend past the region it lives in.
    RegionOverflow,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::InvalidArgument => "invalid argument",
            AllocError::OutOfMemory => "out of memory",
            AllocError::IoMappingFailed => "mapping operation failed",
            AllocError::NotOurBlock => "pointer is not a block owned by this allocator",
            AllocError::CorruptBlock => "block failed integrity check (magic/canary mismatch)",
            AllocError::RegionOverflow => "block size extends past its region",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for AllocError {}

pub type AllocResult<T> = Result<T, AllocError>;
