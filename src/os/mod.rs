//! The OS surface consumed by the core (§6): program-break movement,
//! anonymous page mapping, page size, and thread/stack queries.
//!
//! Grounded on `mmtk-core`'s `util::os` module: a small set of free
//! functions over `libc`, each wrapping a raw syscall with
//! [`wrap_libc_call`] so every OS failure becomes a `std::io::Result`
//! instead of an errno the caller has to remember to check.

mod posix;
pub mod stack;

pub use posix::{current_brk, grow_brk, map_anonymous, page_size, shrink_brk, unmap};

use std::io::Result;

/// Calls `f`, treating a return value equal to `expect` as failure (the
/// `libc` convention for most of the calls this crate makes: `-1` on error,
/// sometimes `MAP_FAILED`). On failure, wraps `errno` in a `std::io::Error`.
pub(crate) fn wrap_libc_call<T: PartialEq + Copy>(f: &dyn Fn() -> T, fail: T) -> Result<T> {
    let ret = f();
    if ret == fail {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
