//! POSIX implementations of the primitives `os::mod` exposes. Linux and
//! macOS share the same calls here (`mmap`/`munmap`/`sbrk`/`sysconf`); where
//! they diverge (stack introspection) the split lives in `os::stack`.

use super::wrap_libc_call;
use crate::address::Address;
use std::io::Result;

/// Returns the current program break.
pub fn current_brk() -> Result<Address> {
    let ptr = unsafe { libc::sbrk(0) };
    if ptr as isize == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(Address::from_mut_ptr(ptr))
}

/// Moves the program break forward by `bytes`, returning the address of the
/// break *before* the move (i.e. the start of the newly available region).
pub fn grow_brk(bytes: usize) -> Result<Address> {
    let prev = unsafe { libc::sbrk(bytes as isize) };
    if prev as isize == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(Address::from_mut_ptr(prev))
}

/// Moves the program break back by `bytes`. Used only by the heap's
/// conservative shrink path (§4.1), and only when the caller has already
/// confirmed the break is exactly where it expects it to be.
pub fn shrink_brk(bytes: usize) -> Result<()> {
    let prev = unsafe { libc::sbrk(-(bytes as isize)) };
    if prev as isize == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Obtains a fresh, zeroed, anonymous, read/write mapping of at least
/// `bytes` (the caller is expected to have already rounded up to a multiple
/// of [`page_size`]).
pub fn map_anonymous(bytes: usize) -> Result<Address> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok(Address::from_mut_ptr(ptr))
}

/// Releases a mapping previously returned by [`map_anonymous`].
pub fn unmap(start: Address, bytes: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::munmap(start.to_mut_ptr(), bytes) },
        -1,
    )?;
    Ok(())
}

/// The system page size, queried once and cached (it cannot change during a
/// process's lifetime).
pub fn page_size() -> usize {
    use std::sync::OnceLock;
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let sz = page_size();
        assert!(sz >= 4096);
        assert!(sz.is_power_of_two());
    }
}
