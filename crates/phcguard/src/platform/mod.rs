#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

/// Reserve `size` bytes of address space with no access rights.
/// Returns null on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn reserve(size: usize) -> *mut u8 {
    sys::reserve(size)
}

/// Map anonymous read-write memory. Returns null on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    sys::map_anonymous(size)
}

/// Unmap previously mapped memory.
///
/// # Safety
/// `ptr` must have been returned by `reserve` or `map_anonymous` and `size` must match.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Protect a memory region as inaccessible.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
pub unsafe fn protect_none(ptr: *mut u8, size: usize) -> bool {
    sys::protect_none(ptr, size)
}

/// Mark memory as read-write.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
pub unsafe fn protect_read_write(ptr: *mut u8, size: usize) -> bool {
    sys::protect_read_write(ptr, size)
}

/// Advise the kernel that the memory range is no longer needed.
/// The kernel may reclaim the physical pages.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
pub unsafe fn advise_free(ptr: *mut u8, size: usize) {
    sys::advise_free(ptr, size);
}

/// OS page size, 4096 if the query fails.
pub fn query_page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 {
        ps as usize
    } else {
        4096
    }
}

/// Installed physical memory in bytes, 0 if unknown.
pub fn physical_memory_bytes() -> u64 {
    sys::physical_memory_bytes()
}

/// A weak seed mixed from a counter, a stack address and the monotonic
/// clock. Used only when the OS entropy source is unavailable.
pub fn fallback_seed() -> u64 {
    static COUNTER: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    let stack_addr = &count as *const _ as u64;
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    splitmix64(
        stack_addr.wrapping_mul(0x517cc1b727220a95)
            ^ count.wrapping_mul(0x9E3779B97F4A7C15)
            ^ (ts.tv_nsec as u64).rotate_left(32)
            ^ ts.tv_sec as u64,
    )
}

/// splitmix64 finalizer.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_memory_is_reported() {
        assert!(physical_memory_bytes() > 0);
    }

    #[test]
    fn reserve_then_protect_round() {
        let ps = query_page_size();
        unsafe {
            let p = reserve(ps * 3);
            assert!(!p.is_null());
            assert!(protect_read_write(p.add(ps), ps));
            p.add(ps).write(0x5A);
            assert_eq!(p.add(ps).read(), 0x5A);
            assert!(protect_none(p.add(ps), ps));
            unmap(p, ps * 3);
        }
    }

    #[test]
    fn fallback_seeds_differ() {
        assert_ne!(fallback_seed(), fallback_seed());
    }
}
