//! A fragmentation workload grounded on `test_internal_fragmentation.c`:
//! many differently-sized allocations interleaved with out-of-order frees,
//! checked for corruption rather than for any particular layout (split and
//! coalesce are free to rearrange memory however they like, as long as
//! every surviving block still holds exactly what was written to it).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sconeheap::{DiagnosticLabel, Heap, Options};
use std::sync::Mutex;

static HEAP_LOCK: Mutex<()> = Mutex::new(());

/// Not secure, but deterministic and reproducible across runs.
const SEED: u64 = 0x4050cb1b5ab26c70;

fn test_opts() -> Options {
    Options {
        quantum: 128,
        num_bins: 10,
        map_threshold: 64 * 1024,
        align: std::mem::size_of::<usize>(),
        gc_interval_ms: 50,
        gc_enabled_at_init: false,
    }
}

fn label(tag: &'static str) -> DiagnosticLabel {
    DiagnosticLabel {
        file: file!(),
        line: line!(),
        label: tag,
    }
}

/// A marker byte derived from an allocation's index, written at both ends
/// of its payload so a corrupting split/coalesce/placement bug (writing
/// past a boundary it shouldn't, or handing out overlapping memory) shows
/// up as a mismatch instead of silently passing.
fn marker_byte(index: usize) -> u8 {
    (index as u8).wrapping_mul(37).wrapping_add(11)
}

#[test]
fn many_sized_allocations_survive_interleaved_frees_without_corruption() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let heap = Heap::new(test_opts()).unwrap();
    let tag = label("fragmentation");

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);

    const COUNT: usize = 200;
    let sizes: Vec<usize> = (0..COUNT).map(|_| rng.random_range(8..2000)).collect();

    let mut live: Vec<Option<(sconeheap::Address, usize)>> = Vec::with_capacity(COUNT);
    for (i, &size) in sizes.iter().enumerate() {
        let ptr = heap
            .alloc_first_fit(size, tag)
            .unwrap_or_else(|e| panic!("allocation {i} of {size} bytes failed: {e}"));
        let marker = marker_byte(i);
        unsafe {
            std::ptr::write(ptr.to_mut_ptr::<u8>(), marker);
            std::ptr::write(ptr.to_mut_ptr::<u8>().add(size - 1), marker);
        }
        live.push(Some((ptr, size)));
    }
    assert_eq!(heap.report().len(), COUNT);

    // Free a pseudo-random half, checking every still-live block's markers
    // both before and after each free (a bad coalesce would corrupt a
    // neighbor at the moment it runs, not just eventually).
    let mut order: Vec<usize> = (0..COUNT).collect();
    for i in (1..order.len()).rev() {
        let j = rng.random_range(0..=i);
        order.swap(i, j);
    }

    for &i in order.iter().take(COUNT / 2) {
        let (ptr, size) = live[i].take().unwrap();
        assert_markers_intact(&live, &sizes);
        heap.free(ptr, tag).unwrap_or_else(|e| panic!("freeing allocation {i} failed: {e}"));
        assert_markers_intact(&live, &sizes);
    }

    // Re-allocate into the fragmented free list to exercise split/coalesce
    // under pressure once more before the final teardown.
    for i in order.iter().take(COUNT / 2).copied() {
        let size = sizes[i];
        let ptr = heap
            .alloc_first_fit(size, tag)
            .unwrap_or_else(|e| panic!("re-allocation {i} of {size} bytes failed: {e}"));
        let marker = marker_byte(i);
        unsafe {
            std::ptr::write(ptr.to_mut_ptr::<u8>(), marker);
            std::ptr::write(ptr.to_mut_ptr::<u8>().add(size - 1), marker);
        }
        live[i] = Some((ptr, size));
    }
    assert_markers_intact(&live, &sizes);
    assert_eq!(heap.report().len(), COUNT);

    for slot in live {
        if let Some((ptr, _)) = slot {
            heap.free(ptr, tag).unwrap();
        }
    }
    assert_eq!(heap.report().len(), 0);
}

fn assert_markers_intact(live: &[Option<(sconeheap::Address, usize)>], sizes: &[usize]) {
    for (i, slot) in live.iter().enumerate() {
        if let Some((ptr, size)) = slot {
            assert_eq!(*size, sizes[i]);
            let marker = marker_byte(i);
            let head = unsafe { std::ptr::read(ptr.to_ptr::<u8>()) };
            let tail = unsafe { std::ptr::read(ptr.to_ptr::<u8>().add(size - 1)) };
            assert_eq!(head, marker, "head marker corrupted for allocation {i}");
            assert_eq!(tail, marker, "tail marker corrupted for allocation {i}");
        }
    }
}
