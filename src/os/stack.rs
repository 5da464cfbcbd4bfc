//! Discovery of the calling thread's usable stack region (§4.8).
//!
//! Grounded on `mmtk-core`'s per-platform `cfg_if!` dispatch in `util::os`:
//! the same logical operation (find my stack) has a different native query
//! on Linux (`pthread_getattr_np`) and macOS (`pthread_get_stackaddr_np` /
//! `pthread_get_stacksize_np`), so the dispatch lives behind `cfg_if!`
//! rather than a runtime branch.

use crate::address::Address;

/// The usable stack of one thread: `[bottom, top)`, guard pages already
/// excluded. Always normalized so `bottom <= top`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StackBounds {
    pub bottom: Address,
    pub top: Address,
}

impl StackBounds {
    fn new(low: Address, high: Address) -> Self {
        debug_assert!(low <= high);
        StackBounds {
            bottom: low,
            top: high,
        }
    }
}

/// Whether the stack grows toward lower or higher addresses. Determined
/// once at startup (§4.8) by comparing the addresses of two consecutive
/// stack-local variables a few frames apart; cached because it cannot
/// change at runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum GrowthDirection {
    Down,
    Up,
}

fn growth_direction() -> GrowthDirection {
    use std::sync::OnceLock;
    static DIRECTION: OnceLock<GrowthDirection> = OnceLock::new();
    *DIRECTION.get_or_init(|| {
        let outer: usize = 0;
        probe_inner(&outer as *const usize as usize)
    })
}

#[inline(never)]
fn probe_inner(outer_addr: usize) -> GrowthDirection {
    let inner: usize = 0;
    let inner_addr = &inner as *const usize as usize;
    if inner_addr < outer_addr {
        GrowthDirection::Down
    } else {
        GrowthDirection::Up
    }
}

/// Queries the current thread's stack base, size, and guard size from the
/// thread runtime, and returns the usable `[bottom, top)` range with the
/// guard page nearest the growth direction excluded.
pub fn current_thread_stack_bounds() -> std::io::Result<StackBounds> {
    let (base, size, guard) = raw_stack_attrs()?;
    let base = base.as_usize();
    Ok(match growth_direction() {
        // Stack grows down: the runtime's `base` is the low end, and the
        // guard page sits just below the high end of usable memory... on
        // most platforms `pthread_attr_getstack` reports `base` as the
        // *lowest* addressable byte of the whole allocation (guard
        // included), so the guard is at the low end for a down-growing
        // stack.
        GrowthDirection::Down => {
            StackBounds::new(Address::from_usize(base + guard), Address::from_usize(base + size))
        }
        GrowthDirection::Up => {
            StackBounds::new(Address::from_usize(base), Address::from_usize(base + size - guard))
        }
    })
}

#[cfg(target_os = "linux")]
fn raw_stack_attrs() -> std::io::Result<(Address, usize, usize)> {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let mut base: *mut libc::c_void = std::ptr::null_mut();
        let mut size: usize = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut base, &mut size);
        let mut guard: usize = 0;
        let guard_rc = libc::pthread_attr_getguardsize(&attr, &mut guard);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 || guard_rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok((Address::from_mut_ptr(base), size, guard))
    }
}

#[cfg(target_os = "macos")]
fn raw_stack_attrs() -> std::io::Result<(Address, usize, usize)> {
    unsafe {
        let thread = libc::pthread_self();
        let high = libc::pthread_get_stackaddr_np(thread) as usize;
        let size = libc::pthread_get_stacksize_np(thread);
        // macOS does not expose a per-thread guard size accessor; the
        // default guard is one page, matching the kernel's default mapping.
        let guard = super::page_size();
        // `pthread_get_stackaddr_np` returns the *high* end of the stack (the
        // one nearest where it started growing from), not the low base that
        // Linux's `pthread_attr_getstack` reports for the whole mapping.
        // Subtract `size` so callers can treat `base` uniformly across
        // platforms as the lowest addressable byte.
        let base = high - size;
        Ok((Address::from_usize(base), size, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_normalized() {
        let bounds = current_thread_stack_bounds().expect("stack attrs must be queryable");
        assert!(bounds.bottom <= bounds.top);
    }

    #[test]
    fn bounds_are_word_sized_at_least() {
        let bounds = current_thread_stack_bounds().unwrap();
        assert!(bounds.top - bounds.bottom >= crate::constants::WORD_SIZE);
    }
}
