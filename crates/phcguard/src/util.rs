use core::sync::atomic::{AtomicUsize, Ordering};

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Smallest alignment handed out for a guarded allocation (max_align_t on 64-bit).
pub const MIN_ALIGN: usize = 16;

pub const MIB: u64 = 1024 * 1024;

/// Runtime page size. Starts at 4096 so `page_size()` never returns zero,
/// then holds the real value once `init_page_size()` has run.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(4096);

/// Initialize the page size from the OS. Idempotent.
pub fn init_page_size() {
    let ps = crate::platform::query_page_size();
    PAGE_SIZE_CACHED.store(ps, Ordering::Release);
}

#[inline(always)]
pub fn page_size() -> usize {
    PAGE_SIZE_CACHED.load(Ordering::Relaxed)
}
