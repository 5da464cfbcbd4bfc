//! Block subdivision on allocation and neighbor merge on release (§4.6).

use crate::address::Address;
use crate::block::{min_block_size, Block};
use crate::freelist::Arena;
use crate::header::{DiagnosticLabel, HEADER_SIZE};

/// `T = align_up(align_up(requested_payload, A) + sizeof(header) + word, A)`:
/// the total block size needed to satisfy a payload request. The outer
/// `align_up` matters whenever `A > WORD_SIZE` (e.g. `A = 16` on a 64-bit
/// target, where `WORD_SIZE = 8`): without it the tail-canary word alone
/// would leave `T` short of a multiple of `A`, and every block §3 requires
/// to have `size` a multiple of `A` would fail that invariant as soon as it
/// was carved from a freshly grown heap region.
pub fn total_needed_for_payload(requested_payload: usize, align: usize) -> usize {
    let raw = align_to(requested_payload, align) + HEADER_SIZE + crate::constants::WORD_SIZE;
    align_to(raw, align)
}

fn align_to(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Splits `block` (already removed from its bin and still flagged free) so
/// that it can satisfy a request needing `total_needed` bytes, carving off
/// and re-binning the remainder when one is big enough to be useful.
///
/// On entry `block` must already be out of `arena`'s bins. On return the
/// returned block is sized exactly `total_needed` (or the original size, if
/// no split occurred) and is marked in-use; any remainder has been
/// reinserted into `arena`.
pub fn split(arena: &mut Arena, block: Block, total_needed: usize, align: usize) -> Block {
    let original_size = block.size();
    let remainder_size = original_size.saturating_sub(total_needed);

    if remainder_size < min_block_size(align) {
        // Whole block goes to the caller; no sliver left behind.
        block.set_free(false);
        log::trace!("split: {block:?} consumed whole ({original_size} bytes, no remainder)");
        return block;
    }

    let next = block.next();
    let remainder_addr = block.addr() + total_needed;
    let remainder = Block::at(remainder_addr);

    block.set_size(total_needed);
    block.set_free(false);

    remainder.init(remainder_size, DiagnosticLabel::UNKNOWN);
    remainder.set_prev(Some(block));
    remainder.set_next(next);
    if let Some(n) = next {
        n.set_prev(Some(remainder));
    }
    block.set_next(Some(remainder));

    arena.insert(remainder);
    log::trace!(
        "split: {block:?} -> used {total_needed} bytes, remainder {remainder:?} ({remainder_size} bytes)"
    );
    block
}

/// Attempts to merge `block` with its neighbor-order `next` then `prev`,
/// provided each exists and is free. Returns the (possibly larger) merged
/// block, already re-sized and with its tail canary rewritten; the merged-
/// away neighbor(s) have been removed from `arena` and the surviving
/// block's neighbor links updated. The returned block is **not** back in
/// `arena` — callers needing that invariant call `arena.insert` themselves
/// (the free path in `heap` uses the merge result to also check the
/// heap-shrink condition before deciding whether to re-bin it).
pub fn coalesce(arena: &mut Arena, mut block: Block) -> Block {
    if let Some(next) = block.next() {
        if next.is_free() {
            arena.remove(next);
            let merged_size = block.size() + next.size();
            let after = next.next();
            block.set_size(merged_size);
            block.set_next(after);
            if let Some(a) = after {
                a.set_prev(Some(block));
            }
            next.invalidate();
            log::trace!("coalesce: merged {block:?} with following {next:?}");
        }
    }
    if let Some(prev) = block.prev() {
        if prev.is_free() {
            arena.remove(prev);
            let merged_size = prev.size() + block.size();
            let after = block.next();
            prev.set_size(merged_size);
            prev.set_next(after);
            if let Some(a) = after {
                a.set_prev(Some(prev));
            }
            block.invalidate();
            log::trace!("coalesce: merged {prev:?} with following {block:?}");
            block = prev;
        }
    }
    block
}
