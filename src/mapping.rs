//! Map backing (§4.2): page-granular anonymous mappings for large
//! allocations, tracked by a singly-linked map list whose nodes live
//! outside the managed heap (see [`MapNode`]).

use crate::address::Address;
use crate::block::Block;
use crate::error::AllocError;
use crate::header::DiagnosticLabel;
use crate::os;

/// One entry in the map list: a mapped region's base/size and the next
/// entry. The node itself is a plain Rust allocation (`Box`), not a block
/// living in the managed heap or map region — bookkeeping for the map list
/// has to exist before there is anywhere else to put it, so routing it
/// through the allocator it describes would be circular. See `DESIGN.md`
/// for this resolution.
#[repr(C)]
struct MapNode {
    base: Address,
    mapped_size: usize,
    next: Option<std::ptr::NonNull<MapNode>>,
    /// The block header living at `base`; kept so `release` can free the
    /// payload block that was handed to the caller.
    block: Block,
}

/// The map list. Exposed through an API that hides the node representation
/// from callers — only [`MapList::iter_blocks`] lets the collector walk
/// the mapped payload blocks.
pub struct MapList {
    head: Option<std::ptr::NonNull<MapNode>>,
}

// Safety: all access to `MapList` happens while the allocator-wide mutex
// (see `crate::heap::Heap`) is held; there is no concurrent mutation.
unsafe impl Send for MapList {}

impl MapList {
    pub fn new() -> Self {
        MapList { head: None }
    }

    /// Acquires a fresh mapping sized to hold a block of at least
    /// `requested_total` bytes, rounded up to a page, installs that block's
    /// header (`free = 0`, `marked = 0`, per the map path in §4.7), and
    /// prepends a node describing the mapping.
    pub fn acquire(&mut self, requested_total: usize, label: DiagnosticLabel) -> Result<Block, AllocError> {
        let page = os::page_size();
        let rounded = (requested_total + page - 1) & !(page - 1);
        let base = os::map_anonymous(rounded).map_err(|e| {
            use std::io::ErrorKind;
            log::warn!("map backing: mmap of {rounded} bytes failed: {e}");
            match e.kind() {
                ErrorKind::OutOfMemory => AllocError::OutOfMemory,
                _ => AllocError::IoMappingFailed,
            }
        })?;
        let block = Block::at(base);
        block.init(rounded, label);

        let node = Box::new(MapNode {
            base,
            mapped_size: rounded,
            next: self.head,
            block,
        });
        let node_ptr = std::ptr::NonNull::new(Box::into_raw(node)).unwrap();
        self.head = Some(node_ptr);
        log::debug!("map backing: acquired {rounded} bytes at {base:?}");
        Ok(block)
    }

    /// Releases the mapping whose block lives at `block`. Returns
    /// `NotOurBlock` if no such entry exists.
    pub fn release(&mut self, block: Block) -> Result<(), AllocError> {
        let mut prev: Option<std::ptr::NonNull<MapNode>> = None;
        let mut cur = self.head;
        while let Some(node_ptr) = cur {
            let node = unsafe { node_ptr.as_ref() };
            if node.block == block {
                let (base, size) = (node.base, node.mapped_size);
                let next = node.next;
                match prev {
                    Some(mut p) => unsafe { p.as_mut().next = next },
                    None => self.head = next,
                }
                unsafe {
                    drop(Box::from_raw(node_ptr.as_ptr()));
                }
                os::unmap(base, size).map_err(|e| {
                    log::warn!("map backing: munmap of {base:?} ({size} bytes) failed: {e}");
                    AllocError::IoMappingFailed
                })?;
                log::debug!("map backing: released {size} bytes at {base:?}");
                return Ok(());
            }
            prev = Some(node_ptr);
            cur = node.next;
        }
        Err(AllocError::NotOurBlock)
    }

    /// Whether `block` is the payload block of some live mapping.
    pub fn contains(&self, block: Block) -> bool {
        self.iter_blocks().any(|b| b == block)
    }

    /// Iterates the payload blocks of every live mapping, in push (most
    /// recently acquired first) order.
    pub fn iter_blocks(&self) -> MapListIter {
        MapListIter { cur: self.head }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl Drop for MapList {
    fn drop(&mut self) {
        let mut cur = self.head;
        while let Some(node_ptr) = cur {
            let node = unsafe { node_ptr.as_ref() };
            let next = node.next;
            let _ = os::unmap(node.base, node.mapped_size);
            unsafe {
                drop(Box::from_raw(node_ptr.as_ptr()));
            }
            cur = next;
        }
    }
}

pub struct MapListIter {
    cur: Option<std::ptr::NonNull<MapNode>>,
}

impl Iterator for MapListIter {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let node_ptr = self.cur?;
        let node = unsafe { node_ptr.as_ref() };
        self.cur = node.next;
        Some(node.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_empties_list() {
        let mut list = MapList::new();
        let block = list
            .acquire(4096, DiagnosticLabel::UNKNOWN)
            .expect("mmap should succeed for a small region");
        assert!(list.contains(block));
        assert!(!block.is_free());
        list.release(block).expect("release of a live mapping should succeed");
        assert!(list.is_empty());
    }

    #[test]
    fn release_of_unknown_block_is_not_our_block() {
        let mut list = MapList::new();
        let bogus = Block::at(Address::from_usize(0x1000));
        assert_eq!(list.release(bogus), Err(AllocError::NotOurBlock));
    }

    #[test]
    fn multiple_entries_iterate_in_push_order() {
        let mut list = MapList::new();
        let a = list.acquire(4096, DiagnosticLabel::UNKNOWN).unwrap();
        let b = list.acquire(4096, DiagnosticLabel::UNKNOWN).unwrap();
        let blocks: Vec<_> = list.iter_blocks().collect();
        assert_eq!(blocks, vec![b, a]);
    }
}
