//! Scenario 4 of §8: repeatedly allocate until the heap is genuinely
//! exhausted, then free every survivor in reverse order.
//!
//! Driving a real process to out-of-memory is neither safe nor
//! deterministic, so this test instead lowers `RLIMIT_DATA` (the `brk`
//! segment's size cap on Linux) to a small multiple of the allocation size
//! before running the loop: `grow_brk` then fails with `ENOMEM` well before
//! the process's actual memory is threatened, in exactly the shape §4.1
//! describes ("heap growth impossible" -> `OutOfMemory`). This is the only
//! test in the crate that touches process resource limits, so it is kept
//! alone in its own binary rather than sharing a process with any other
//! `Heap`-constructing test.

#![cfg(target_os = "linux")]

use sconeheap::{AllocError, DiagnosticLabel, Heap, Options};

const ALLOC_SIZE: usize = 1024;

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

/// Lowers `RLIMIT_DATA`'s soft limit to `current_brk + headroom`, so
/// further `sbrk` growth past that point fails with `ENOMEM`.
fn cap_data_segment(headroom: usize) {
    unsafe {
        let current_brk = libc::sbrk(0);
        assert!(current_brk as isize != -1, "sbrk(0) must succeed to read the current break");

        let mut rlim: libc::rlimit = std::mem::zeroed();
        let rc = libc::getrlimit(libc::RLIMIT_DATA, &mut rlim);
        assert_eq!(rc, 0, "getrlimit(RLIMIT_DATA) must succeed");

        let new_cur = (current_brk as usize + headroom) as libc::rlim_t;
        rlim.rlim_cur = new_cur.min(rlim.rlim_max);
        let rc = libc::setrlimit(libc::RLIMIT_DATA, &rlim);
        assert_eq!(rc, 0, "setrlimit(RLIMIT_DATA) must succeed to bound this test's heap");
    }
}

#[test]
fn repeated_allocation_exhausts_the_heap_then_frees_every_survivor() {
    cap_data_segment(256 * 1024);

    let heap = Heap::new(test_opts()).expect("heap construction must succeed before the cap bites");
    let tag = label("exhaustion");

    let mut allocated = Vec::new();
    loop {
        match heap.alloc_first_fit(ALLOC_SIZE, tag) {
            Ok(ptr) => allocated.push(ptr),
            Err(AllocError::OutOfMemory) => break,
            Err(e) => panic!("unexpected error while exhausting the heap: {e}"),
        }
    }

    assert!(!allocated.is_empty(), "the capped heap must allow at least one allocation");

    for &ptr in allocated.iter().rev() {
        heap.free(ptr, tag).expect("freeing a live pointer must succeed even under the rlimit cap");
    }
    assert_eq!(heap.report().len(), 0);
}
