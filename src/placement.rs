//! The three placement strategies (§4.5): first-fit, best-fit, next-fit.
//!
//! Each walks the segregated bins starting at the size class of the
//! requested total and validates every candidate before accepting it — an
//! invalid candidate (caught mid-scan by [`Block::validate_structure`]) is
//! logged and skipped rather than treated as fatal, so a corrupted free
//! list degrades the search instead of crashing the allocator.

use crate::address::Address;
use crate::block::Block;
use crate::error::AllocError;
use crate::freelist::{size_class, Arena};

/// Which placement algorithm to use for a given call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlacementStrategy {
    FirstFit,
    BestFit,
    NextFit,
}

fn valid_free_candidate(block: Block, region_end: Address, align: usize) -> bool {
    match block.validate_structure(region_end, align) {
        Ok(()) => block.is_free(),
        Err(e) => {
            log::warn!("placement: skipping invalid free-list candidate {block:?}: {e}");
            false
        }
    }
}

/// First block in `arena` (scanning from `size_class(total_needed)` upward)
/// whose validated size is `>= total_needed`.
pub fn first_fit(
    arena: &Arena,
    total_needed: usize,
    quantum: usize,
    region_end: Address,
    align: usize,
) -> Option<Block> {
    let start = size_class(total_needed, quantum, arena.num_bins());
    for idx in start..arena.num_bins() {
        let mut cur = arena.bin_head(idx);
        while let Some(b) = cur {
            if valid_free_candidate(b, region_end, align) && b.size() >= total_needed {
                log::trace!("first-fit: selected {b:?} from bin {idx}");
                return Some(b);
            }
            cur = b.fl_next();
        }
    }
    None
}

/// Smallest valid free block `>= total_needed`, scanning only the first
/// non-empty class at or above `size_class(total_needed)` (early
/// termination, per §4.5) with ties broken by encounter order.
pub fn best_fit(
    arena: &Arena,
    total_needed: usize,
    quantum: usize,
    region_end: Address,
    align: usize,
) -> Option<Block> {
    let start = size_class(total_needed, quantum, arena.num_bins());
    for idx in start..arena.num_bins() {
        let mut best: Option<Block> = None;
        let mut cur = arena.bin_head(idx);
        let mut any = false;
        while let Some(b) = cur {
            any = true;
            if valid_free_candidate(b, region_end, align) && b.size() >= total_needed {
                best = Some(match best {
                    Some(cur_best) if cur_best.size() <= b.size() => cur_best,
                    _ => b,
                });
            }
            cur = b.fl_next();
        }
        if any {
            // First non-empty class: stop here whether or not it yielded a
            // usable candidate — that is the early-termination rule.
            if best.is_some() {
                log::trace!("best-fit: selected {:?} from bin {idx}", best);
            }
            return best;
        }
    }
    None
}

/// Scans neighbor order starting at `cursor` (the allocator's
/// `last_allocated`), wrapping via `next()` back to `heap_first_block` and
/// stopping once the scan returns to its start. Falls back to first-fit
/// when `cursor` is `None` or no longer a valid free block. On success,
/// returns the chosen block; the caller is responsible for updating
/// `last_allocated`.
pub fn next_fit(
    arena: &Arena,
    total_needed: usize,
    quantum: usize,
    region_end: Address,
    align: usize,
    cursor: Option<Block>,
    heap_first_block: Option<Block>,
) -> Option<Block> {
    let start = match cursor {
        Some(b) if valid_free_candidate(b, region_end, align) => b,
        _ => {
            log::trace!("next-fit: cursor invalid or absent, falling back to first-fit");
            return first_fit(arena, total_needed, quantum, region_end, align);
        }
    };

    let mut cur = Some(start);
    loop {
        let b = cur?;
        if valid_free_candidate(b, region_end, align) && b.size() >= total_needed {
            log::trace!("next-fit: selected {b:?}");
            return Some(b);
        }
        let advanced = b.next().or(heap_first_block);
        match advanced {
            Some(n) if n != start => cur = Some(n),
            _ => return None,
        }
    }
}

/// Runs `strategy` over `arena`, returning the dedicated out-of-space error
/// when nothing fits.
pub fn find_block(
    strategy: PlacementStrategy,
    arena: &Arena,
    total_needed: usize,
    quantum: usize,
    region_end: Address,
    align: usize,
    next_fit_cursor: Option<Block>,
    heap_first_block: Option<Block>,
) -> Result<Block, AllocError> {
    let found = match strategy {
        PlacementStrategy::FirstFit => first_fit(arena, total_needed, quantum, region_end, align),
        PlacementStrategy::BestFit => best_fit(arena, total_needed, quantum, region_end, align),
        PlacementStrategy::NextFit => next_fit(
            arena,
            total_needed,
            quantum,
            region_end,
            align,
            next_fit_cursor,
            heap_first_block,
        ),
    };
    found.ok_or(AllocError::OutOfMemory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DiagnosticLabel;
    use crate::constants::WORD_SIZE;

    fn carved(mem: &mut [usize], size: usize) -> Block {
        let b = Block::at(Address::from_ptr(mem.as_ptr()));
        b.init(size, DiagnosticLabel::UNKNOWN);
        b
    }

    #[test]
    fn first_fit_picks_first_adequate_block_in_class() {
        let mut small_mem = [0usize; 64];
        let mut big_mem = [0usize; 64];
        let small = carved(&mut small_mem, 256);
        let big = carved(&mut big_mem, 512);
        let mut arena = Arena::new(10, 128);
        arena.insert(small);
        arena.insert(big);
        let region_end = Address::from_usize(usize::MAX / 2);
        let found = first_fit(&arena, 300, 128, region_end, WORD_SIZE);
        assert_eq!(found, Some(big));
    }

    #[test]
    fn best_fit_picks_smallest_adequate_block() {
        let mut mem_a = [0usize; 96];
        let mut mem_b = [0usize; 96];
        // Both fall in the same size class (>1 quantum <=2 quantum).
        let a = carved(&mut mem_a, 256);
        let b = carved(&mut mem_b, 200);
        let mut arena = Arena::new(10, 128);
        arena.insert(a);
        arena.insert(b);
        let region_end = Address::from_usize(usize::MAX / 2);
        let found = best_fit(&arena, 192, 128, region_end, WORD_SIZE);
        assert_eq!(found, Some(b));
    }

    #[test]
    fn next_fit_falls_back_to_first_fit_without_cursor() {
        let mut mem = [0usize; 64];
        let b = carved(&mut mem, 256);
        let mut arena = Arena::new(10, 128);
        arena.insert(b);
        let region_end = Address::from_usize(usize::MAX / 2);
        let found = next_fit(&arena, 64, 128, region_end, WORD_SIZE, None, None);
        assert_eq!(found, Some(b));
    }
}
