//! The segregated free-list manager (§3 "Arena"/"Bin", §4.4).
//!
//! Grounded on the design notes' guidance to keep intrusive lists but model
//! each one as its own typed handle: `Arena` owns the bin heads and is the
//! only thing allowed to splice a `Block` into or out of a bin, so "a block
//! is free and in a bin" vs. "a block is in-use" can't drift apart from two
//! places disagreeing about a link.

use crate::block::Block;

/// Returns the size-class index for a block (or allocation) whose total
/// size is `total` bytes: `ceil(total / quantum)`, clamped to the last bin
/// (§3, §4.4). Note this means bin `0` is never populated by a nonzero
/// `total` — the clamping is specified against the raw `ceil` result, not
/// `ceil - 1`.
pub fn size_class(total: usize, quantum: usize, num_bins: usize) -> usize {
    total.div_ceil(quantum).min(num_bins - 1)
}

/// The arena: an ordered sequence of size-class bins, each the head of a
/// doubly-linked, LIFO free list.
pub struct Arena {
    bins: Vec<Option<Block>>,
    quantum: usize,
}

impl Arena {
    pub fn new(num_bins: usize, quantum: usize) -> Self {
        Arena {
            bins: vec![None; num_bins],
            quantum,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    fn class_of(&self, block: Block) -> usize {
        size_class(block.size(), self.quantum, self.bins.len())
    }

    /// Head of bin `idx`, if non-empty.
    pub fn bin_head(&self, idx: usize) -> Option<Block> {
        self.bins[idx]
    }

    /// Number of blocks currently queued in bin `idx`. O(n) in the bin —
    /// used by diagnostics, not by the hot allocation path.
    pub fn bin_len(&self, idx: usize) -> usize {
        let mut count = 0;
        let mut cur = self.bins[idx];
        while let Some(b) = cur {
            count += 1;
            cur = b.fl_next();
        }
        count
    }

    /// Pushes `block` onto the head of its size class's bin. O(1).
    pub fn insert(&mut self, block: Block) {
        let idx = self.class_of(block);
        let old_head = self.bins[idx];
        block.set_fl_prev(None);
        block.set_fl_next(old_head);
        if let Some(head) = old_head {
            head.set_fl_prev(Some(block));
        }
        self.bins[idx] = Some(block);
        block.set_free(true);
        log::trace!("freelist: inserted {:?} into bin {idx}", block);
    }

    /// Splices `block` out of whichever bin it is the head of or sits in
    /// the middle of. O(1). The caller must know `block` is actually
    /// free and in a bin (the free-list links are only meaningful then).
    pub fn remove(&mut self, block: Block) {
        let idx = self.class_of(block);
        let prev = block.fl_prev();
        let next = block.fl_next();
        match prev {
            Some(p) => p.set_fl_next(next),
            None => self.bins[idx] = next,
        }
        if let Some(n) = next {
            n.set_fl_prev(prev);
        }
        block.set_fl_prev(None);
        block.set_fl_next(None);
        log::trace!("freelist: removed {:?} from bin {idx}", block);
    }
}
