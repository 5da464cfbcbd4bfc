//! Shared test-only state.
//!
//! Every test that moves the real program break (directly, through
//! [`crate::backing::HeapBacking`], or indirectly, through constructing a
//! [`crate::heap::Heap`]) must serialize against every other such test in
//! this binary: `sbrk` mutates one process-wide value, and cargo runs
//! `#[test]` functions concurrently on separate threads within the same
//! process by default.

#[cfg(test)]
pub(crate) static BRK_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
