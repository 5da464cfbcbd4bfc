//! A typed cursor over a [`BlockHeader`] living at some [`Address`] (§4.3).
//!
//! Per the design notes: neighbor traversal goes through a typed handle
//! that verifies bounds on each step rather than raw pointer arithmetic
//! sprinkled through the allocator front. `Block` itself never asserts that
//! the memory it points at is actually one of ours — call
//! [`Block::validate_structure`] (or go through
//! [`crate::heap::Heap`]'s `classify`, which additionally checks region
//! membership) before trusting any field read from it.

use crate::address::Address;
use crate::constants::{HEAD_CANARY, MAGIC, TAIL_CANARY};
use crate::error::AllocError;
use crate::header::{BlockHeader, DiagnosticLabel, HEADER_SIZE};

/// Minimum possible block size: a header plus one trailing canary word, at
/// a given alignment `A`. Floors the tail at `WORD_SIZE` even when `A <
/// WORD_SIZE` (e.g. `A = 2` or `4`) — the tail canary is always a full
/// `usize`, so a block sized `HEADER_SIZE + A` alone would place
/// `tail_canary_addr` (`block.rs`'s `self.0 + self.size() - WORD_SIZE`)
/// inside the header itself rather than past it.
pub fn min_block_size(align: usize) -> usize {
    HEADER_SIZE + align.max(crate::constants::WORD_SIZE)
}

/// A cursor over a block header at a known address. Copy, like `Address`:
/// holding a `Block` asserts nothing about validity.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Block(Address);

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Block({:?})", self.0)
    }
}

impl Block {
    #[inline]
    pub fn at(addr: Address) -> Self {
        Block(addr)
    }

    #[inline]
    pub fn addr(self) -> Address {
        self.0
    }

    /// The block whose payload starts at `payload_addr`.
    #[inline]
    pub fn from_payload(payload_addr: Address) -> Self {
        Block(payload_addr - HEADER_SIZE)
    }

    #[inline]
    pub fn payload(self) -> Address {
        self.0 + HEADER_SIZE
    }

    #[inline]
    fn header_ptr(self) -> *mut BlockHeader {
        self.0.to_mut_ptr()
    }

    /// # Safety
    /// The header at this address must already be known structurally valid
    /// (caller has run `validate_structure` or equivalent).
    #[inline]
    unsafe fn header(self) -> &'static BlockHeader {
        &*self.header_ptr()
    }

    #[inline]
    unsafe fn header_mut(self) -> &'static mut BlockHeader {
        &mut *self.header_ptr()
    }

    pub fn size(self) -> usize {
        unsafe { self.header().size }
    }

    pub fn payload_size(self) -> usize {
        self.size() - HEADER_SIZE - crate::constants::WORD_SIZE
    }

    pub fn is_free(self) -> bool {
        unsafe { self.header().is_free() }
    }

    pub fn set_free(self, free: bool) {
        unsafe { self.header_mut().set_free(free) }
    }

    pub fn is_marked(self) -> bool {
        unsafe { self.header().is_marked() }
    }

    pub fn set_marked(self, marked: bool) {
        unsafe { self.header_mut().set_marked(marked) }
    }

    pub fn label(self) -> DiagnosticLabel {
        unsafe { self.header().label }
    }

    pub fn set_label(self, label: DiagnosticLabel) {
        unsafe { self.header_mut().label = label }
    }

    pub fn prev(self) -> Option<Block> {
        let raw = unsafe { self.header().prev };
        (raw != 0).then(|| Block(Address::from_usize(raw)))
    }

    pub fn next(self) -> Option<Block> {
        let raw = unsafe { self.header().next };
        (raw != 0).then(|| Block(Address::from_usize(raw)))
    }

    pub fn set_prev(self, b: Option<Block>) {
        unsafe { self.header_mut().prev = b.map_or(0, |b| b.0.as_usize()) }
    }

    pub fn set_next(self, b: Option<Block>) {
        unsafe { self.header_mut().next = b.map_or(0, |b| b.0.as_usize()) }
    }

    pub fn fl_prev(self) -> Option<Block> {
        let raw = unsafe { self.header().fl_prev };
        (raw != 0).then(|| Block(Address::from_usize(raw)))
    }

    pub fn fl_next(self) -> Option<Block> {
        let raw = unsafe { self.header().fl_next };
        (raw != 0).then(|| Block(Address::from_usize(raw)))
    }

    pub fn set_fl_prev(self, b: Option<Block>) {
        unsafe { self.header_mut().fl_prev = b.map_or(0, |b| b.0.as_usize()) }
    }

    pub fn set_fl_next(self, b: Option<Block>) {
        unsafe { self.header_mut().fl_next = b.map_or(0, |b| b.0.as_usize()) }
    }

    fn tail_canary_addr(self) -> Address {
        self.0 + self.size() - crate::constants::WORD_SIZE
    }

    /// Writes `magic`, `head_canary`, `tail_canary`, `size`, `flags`
    /// (cleared) and `label` into a freshly carved block. Neighbor and
    /// free-list links are left at `0` (none) — the caller links them in.
    pub fn init(self, size: usize, label: DiagnosticLabel) {
        unsafe {
            let h = self.header_mut();
            h.magic = MAGIC;
            h.size = size;
            h.flags = 0;
            h.label = label;
            h.head_canary = HEAD_CANARY;
            h.prev = 0;
            h.next = 0;
            h.fl_prev = 0;
            h.fl_next = 0;
            std::ptr::write(self.tail_canary_addr().to_mut_ptr::<usize>(), TAIL_CANARY);
        }
    }

    /// Rewrites just the tail canary at the block's (possibly just-changed)
    /// size. Used after a split or coalesce changes `size`.
    pub fn rewrite_tail_canary(self) {
        unsafe {
            std::ptr::write(self.tail_canary_addr().to_mut_ptr::<usize>(), TAIL_CANARY);
        }
    }

    pub fn set_size(self, size: usize) {
        unsafe { self.header_mut().size = size };
        self.rewrite_tail_canary();
    }

    /// Clears `magic` so this address fails `validate_structure` at the
    /// first check capable of catching it. Used when a block is absorbed
    /// into a neighbor by [`crate::splitcoalesce::coalesce`]: its header is
    /// never visited through the neighbor-order chain again, but a stale
    /// handle elsewhere (e.g. a next-fit cursor) must not mistake its
    /// leftover bytes for a still-valid free block.
    pub fn invalidate(self) {
        unsafe { self.header_mut().magic = 0 }
    }

    /// Runs the structural checks of §4.3 that do not depend on which
    /// region (heap or map) the candidate lives in: alignment, the header
    /// fitting before `region_end`, size being aligned and at least the
    /// minimum, size not overflowing the region, magic, head canary, and
    /// tail canary — in that order, each with its own distinguishable
    /// failure.
    pub fn validate_structure(
        self,
        region_end: Address,
        align: usize,
    ) -> Result<(), AllocError> {
        if !self.0.is_aligned_to(align) {
            return Err(AllocError::NotOurBlock);
        }
        if self.0 + HEADER_SIZE > region_end {
            return Err(AllocError::NotOurBlock);
        }
        // Read `size` only after confirming the header itself fits.
        let size = unsafe { self.header().size };
        if size % align != 0 || size < min_block_size(align) {
            return Err(AllocError::NotOurBlock);
        }
        if self.0 + size > region_end {
            return Err(AllocError::RegionOverflow);
        }
        if unsafe { self.header().magic } != MAGIC {
            return Err(AllocError::CorruptBlock);
        }
        if unsafe { self.header().head_canary } != HEAD_CANARY {
            return Err(AllocError::CorruptBlock);
        }
        if unsafe { std::ptr::read(self.tail_canary_addr().to_ptr::<usize>()) } != TAIL_CANARY {
            return Err(AllocError::CorruptBlock);
        }
        Ok(())
    }
}
