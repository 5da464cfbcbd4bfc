//! Heap backing (§4.1): acquiring and releasing heap address space by
//! moving the program break.

use crate::address::Address;
use crate::error::AllocError;
use crate::os;

/// Tracks the heap's address-space extent and the most recent growth
/// lease, so a tail-of-heap free can hand exactly that lease back to the OS.
pub struct HeapBacking {
    pub heap_start: Address,
    pub heap_end: Address,
    pub last_brk_start: Address,
    pub last_brk_end: Address,
}

impl HeapBacking {
    /// Establishes the backing at the current program break, with no space
    /// grown yet (`heap_start == heap_end`).
    pub fn new() -> std::io::Result<Self> {
        let start = os::current_brk()?;
        Ok(HeapBacking {
            heap_start: start,
            heap_end: start,
            last_brk_start: start,
            last_brk_end: start,
        })
    }

    /// Grows the heap by `bytes`, zeroing the new region and recording it
    /// as the current lease. Returns the address of the start of the new
    /// region (== the previous `heap_end`).
    pub fn grow(&mut self, bytes: usize) -> Result<Address, AllocError> {
        let prev_end = os::grow_brk(bytes).map_err(|e| {
            log::warn!("heap backing: brk growth by {bytes} bytes failed: {e}");
            AllocError::OutOfMemory
        })?;
        debug_assert_eq!(prev_end, self.heap_end);
        unsafe {
            std::ptr::write_bytes(prev_end.to_mut_ptr::<u8>(), 0, bytes);
        }
        self.heap_end = prev_end + bytes;
        self.last_brk_start = prev_end;
        self.last_brk_end = self.heap_end;
        log::debug!(
            "heap backing: grew by {bytes} bytes, heap now [{:?}, {:?})",
            self.heap_start,
            self.heap_end
        );
        Ok(prev_end)
    }

    /// Attempts to shrink the heap back by the most recent lease, but only
    /// when `block_end` is exactly the current break, the current break
    /// equals `heap_end`, and `block_end - block_start >= ` the lease size
    /// (the lease-matching variant mandated by §9's open question). Returns
    /// `true` if the shrink happened. A failed OS call is swallowed: the
    /// caller reinserts the block and treats this as a no-op, per §4.1 and
    /// §7 ("shrink failures are swallowed").
    pub fn try_shrink_tail(&mut self, block_end: Address) -> bool {
        if block_end != self.heap_end {
            return false;
        }
        let lease = self.last_brk_end - self.last_brk_start;
        if lease == 0 || self.last_brk_end != self.heap_end {
            return false;
        }
        match os::shrink_brk(lease) {
            Ok(()) => {
                self.heap_end = self.last_brk_start;
                log::debug!(
                    "heap backing: shrank by {lease} bytes, heap now [{:?}, {:?})",
                    self.heap_start,
                    self.heap_end
                );
                // The lease has been returned; there is nothing left to
                // hand back until the next `grow`.
                self.last_brk_start = self.heap_end;
                self.last_brk_end = self.heap_end;
                true
            }
            Err(e) => {
                log::warn!("heap backing: shrink by {lease} bytes failed, keeping block: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::BRK_TEST_LOCK;

    #[test]
    fn grow_advances_heap_end_and_records_lease() {
        let _guard = BRK_TEST_LOCK.lock().unwrap();
        let mut backing = HeapBacking::new().expect("brk must be queryable in test env");
        let start_end = backing.heap_end;
        let got = backing.grow(4096).expect("growth should succeed for a small request");
        assert_eq!(got, start_end);
        assert_eq!(backing.heap_end, start_end + 4096usize);
        assert_eq!(backing.last_brk_start, start_end);
        assert_eq!(backing.last_brk_end, start_end + 4096usize);
    }

    #[test]
    fn shrink_refuses_when_break_has_moved_past_lease() {
        let _guard = BRK_TEST_LOCK.lock().unwrap();
        let mut backing = HeapBacking::new().unwrap();
        backing.grow(4096).unwrap();
        // Simulate further, unrelated growth having happened so the
        // recorded lease no longer abuts `heap_end`.
        backing.grow(4096).unwrap();
        let stale_end = backing.last_brk_start; // not heap_end anymore
        assert!(!backing.try_shrink_tail(stale_end));
    }
}
