//! Mark-and-sweep mechanics (§4.9): conservative stack scanning, transitive
//! scanning of marked payloads, and the sweep that reclaims anything left
//! unmarked.
//!
//! This module knows nothing about the allocator-wide mutex or the
//! background worker — it is pure mechanism, driven one call at a time by
//! [`crate::heap::Heap::collect`], the same split `mmtk-core` draws between
//! `scheduler` (policy: when to run) and the work types it schedules
//! (mechanism: what running does).

use std::collections::VecDeque;

use crate::address::Address;
use crate::backing::HeapBacking;
use crate::block::Block;
use crate::constants::WORD_SIZE;
use crate::freelist::Arena;
use crate::mapping::MapList;
use crate::os::stack::StackBounds;
use crate::splitcoalesce::coalesce;

/// Tallies from one collection cycle, surfaced to callers through
/// `Heap::collect`'s return value for diagnostics.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CollectStats {
    pub heap_blocks_freed: usize,
    pub heap_bytes_freed: usize,
    pub mappings_released: usize,
}

/// Runs one full mark-then-sweep cycle.
///
/// `classify` resolves a candidate address to the live, in-use block that
/// contains it (if any) — it is the caller's `Heap::classify_for_gc`, which
/// alone knows how to tell heap addresses from mapped ones and validate a
/// candidate's structure before trusting it. `heap_first_block` is the
/// lowest-addressed heap block, if the heap is non-empty (its address never
/// moves, so the caller can recompute it cheaply each cycle rather than
/// tracking it as mutable state).
pub fn collect<F>(
    stack: StackBounds,
    classify: F,
    heap_first_block: Option<Block>,
    map_list: &mut MapList,
    arena: &mut Arena,
    backing: &mut HeapBacking,
) -> CollectStats
where
    F: Fn(Address) -> Option<Block>,
{
    mark(stack, &classify);
    sweep(heap_first_block, map_list, arena, backing)
}

/// Scans `stack`, then transitively scans the payload of every block it
/// finds a live pointer into, marking each exactly once.
fn mark<F>(stack: StackBounds, classify: &F)
where
    F: Fn(Address) -> Option<Block>,
{
    let mut worklist: VecDeque<Block> = VecDeque::new();
    scan_range(stack.bottom, stack.top, classify, &mut worklist);
    log::trace!(
        "gc: stack scan [{:?}, {:?}) queued {} root block(s)",
        stack.bottom,
        stack.top,
        worklist.len()
    );

    while let Some(block) = worklist.pop_front() {
        let payload_start = block.payload();
        let payload_end = payload_start + block.payload_size();
        scan_range(payload_start, payload_end, classify, &mut worklist);
    }
}

/// Conservatively treats every aligned word in `[start, end)` as a
/// potential pointer: resolves it through `classify`, and if it names an
/// unmarked live block, marks it and enqueues it for its own payload to be
/// scanned in turn.
fn scan_range<F>(start: Address, end: Address, classify: &F, worklist: &mut VecDeque<Block>)
where
    F: Fn(Address) -> Option<Block>,
{
    let mut cursor = start.align_up(WORD_SIZE);
    while cursor + WORD_SIZE <= end {
        let candidate = unsafe { cursor.load_word_volatile() };
        if let Some(block) = classify(Address::from_usize(candidate)) {
            if !block.is_marked() {
                block.set_marked(true);
                worklist.push_back(block);
            }
        }
        cursor = cursor + WORD_SIZE;
    }
}

/// Walks the heap's neighbor-order chain and the map list once each,
/// reclaiming anything left unmarked and clearing the mark bit on anything
/// that survives, so the next cycle starts from a clean slate.
fn sweep(
    heap_first_block: Option<Block>,
    map_list: &mut MapList,
    arena: &mut Arena,
    backing: &mut HeapBacking,
) -> CollectStats {
    let mut stats = CollectStats::default();

    let mut cur = heap_first_block;
    while let Some(block) = cur {
        if block.is_free() {
            cur = block.next();
            continue;
        }
        if block.is_marked() {
            block.set_marked(false);
            cur = block.next();
            continue;
        }

        let freed_size = block.size();
        let label = block.label();
        block.set_free(true);
        let merged = coalesce(arena, block);
        let block_end = merged.addr() + merged.size();
        if backing.try_shrink_tail(block_end) {
            cur = None;
        } else {
            arena.insert(merged);
            cur = merged.next();
        }
        stats.heap_blocks_freed += 1;
        stats.heap_bytes_freed += freed_size;
        log::debug!(
            "gc: reclaimed {freed_size} byte heap block (label {label:?}) left unreachable"
        );
    }

    let live_mappings: Vec<Block> = map_list.iter_blocks().collect();
    for block in live_mappings {
        if block.is_marked() {
            block.set_marked(false);
            continue;
        }
        let label = block.label();
        match map_list.release(block) {
            Ok(()) => {
                stats.mappings_released += 1;
                log::debug!("gc: released mapping (label {label:?}) left unreachable");
            }
            Err(e) => {
                log::warn!("gc: failed to release unreachable mapping: {e}");
            }
        }
    }

    stats
}
