//! sconeheap is a user-space dynamic memory allocator with an integrated
//! conservative mark-and-sweep garbage collector.
//!
//! Logically, this crate has two halves:
//! * An allocator: a segregated free-list over heap space obtained by moving
//!   the program break ([`backing`]), plus a page-granular `mmap` path for
//!   large requests ([`mapping`]). Blocks are split and coalesced
//!   ([`splitcoalesce`]) under one of three placement strategies
//!   ([`placement`]).
//! * A collector: conservative stack scanning and transitive payload
//!   scanning drive a mark/sweep cycle ([`gc`]), run either on demand or by
//!   a background worker thread at a configurable interval.
//!
//! [`heap::Heap`] is the single type a caller constructs; every other module
//! is an implementation detail reached through it.

mod address;
mod backing;
mod block;
mod constants;
mod error;
mod freelist;
mod gc;
mod header;
mod heap;
mod logging;
mod mapping;
mod options;
mod os;
mod placement;
mod splitcoalesce;
#[cfg(test)]
mod test_support;

pub use crate::address::Address;
pub use crate::error::{AllocError, AllocResult};
pub use crate::gc::CollectStats;
pub use crate::header::DiagnosticLabel;
pub use crate::heap::Heap;
pub use crate::options::Options;
pub use crate::placement::PlacementStrategy;
