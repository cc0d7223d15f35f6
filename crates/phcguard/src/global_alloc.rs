//! `#[global_allocator]` support.
//!
//! Layers the guard over another allocator:
//!
//! ```rust,ignore
//! use phcguard::{PhcAllocator, PhcConfig, PoolConfig, ProcessRole};
//! use std::alloc::System;
//!
//! #[global_allocator]
//! static GLOBAL: PhcAllocator<System> = PhcAllocator::new(System, PoolConfig::DEFAULT);
//!
//! fn main() {
//!     GLOBAL.guard().init(ProcessRole::LongLived, &PhcConfig::default()).ok();
//!     // ...
//!     GLOBAL.guard().shutdown();
//! }
//! ```
//!
//! Until `init` runs every request goes straight to the inner allocator.

use core::alloc::{GlobalAlloc, Layout};

use crate::config::PoolConfig;
use crate::guard::PhcGuard;

pub struct PhcAllocator<A> {
    inner: A,
    guard: PhcGuard,
}

impl<A> PhcAllocator<A> {
    pub const fn new(inner: A, pool: PoolConfig) -> Self {
        PhcAllocator {
            inner,
            guard: PhcGuard::new(pool),
        }
    }

    pub fn guard(&self) -> &PhcGuard {
        &self.guard
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

/// `GlobalAlloc` carries no call-site information, so the allocating
/// thread is recorded as the slot's tag.
#[inline]
fn call_site_tag() -> usize {
    unsafe { libc::pthread_self() as usize }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for PhcAllocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if let Some(p) = self
            .guard
            .on_alloc(layout.size(), layout.align(), call_site_tag())
        {
            return p.as_ptr();
        }
        self.inner.alloc(layout)
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if let Some(p) = self
            .guard
            .on_alloc(layout.size(), layout.align(), call_site_tag())
        {
            // Slot pages may carry stale bytes on platforms where returned
            // pages are not guaranteed zero.
            core::ptr::write_bytes(p.as_ptr(), 0, layout.size());
            return p.as_ptr();
        }
        self.inner.alloc_zeroed(layout)
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if self.guard.on_free(ptr) {
            return;
        }
        self.inner.dealloc(ptr, layout);
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !self.guard.owns(ptr) {
            return self.inner.realloc(ptr, layout, new_size);
        }

        // A freed slot is PROT_NONE; let the free hook report it instead of
        // faulting on the copy.
        let Some(old_size) = self.guard.usable_size(ptr) else {
            self.guard.on_free(ptr);
            return core::ptr::null_mut();
        };

        // Guarded allocations always move, so the new block is again
        // pushed against its slot's trailing guard page.
        let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
        let new_ptr = self.alloc(new_layout);
        if !new_ptr.is_null() {
            core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
            self.dealloc(ptr, layout);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PhcConfig, ProbabilityConfig, ProcessRole};
    use std::alloc::System;

    fn intercept_all() -> PhcConfig {
        let every = ProbabilityConfig {
            first: 1,
            normal: 1,
            page_reuse: 1,
        };
        PhcConfig {
            enabled: true,
            min_ram_mb: 0,
            avg_delay: every,
            content_avg_delay: every,
        }
    }

    #[test]
    fn realloc_moves_guarded_blocks() {
        let a = PhcAllocator::new(
            System,
            PoolConfig {
                slots: 4,
                pages_per_slot: 1,
            },
        );
        a.guard()
            .init_seeded(ProcessRole::LongLived, &intercept_all(), 5)
            .unwrap();

        unsafe {
            let layout = Layout::from_size_align(24, 8).unwrap();
            let p = a.alloc(layout);
            assert!(a.guard().owns(p));
            p.copy_from_nonoverlapping(b"guarded bytes, 24 long!!".as_ptr(), 24);

            let q = a.realloc(p, layout, 40);
            assert_ne!(p, q);
            assert!(a.guard().owns(q));
            assert_eq!(core::slice::from_raw_parts(q, 24), b"guarded bytes, 24 long!!");
            assert!(a.guard().usable_size(p).is_none());
            a.dealloc(q, Layout::from_size_align(40, 8).unwrap());
        }
    }

    #[test]
    fn zeroed_guarded_alloc_is_zero() {
        let a = PhcAllocator::new(
            System,
            PoolConfig {
                slots: 2,
                pages_per_slot: 1,
            },
        );
        a.guard()
            .init_seeded(ProcessRole::LongLived, &intercept_all(), 6)
            .unwrap();
        unsafe {
            let layout = Layout::from_size_align(256, 16).unwrap();
            let p = a.alloc_zeroed(layout);
            assert!(a.guard().owns(p));
            assert!(core::slice::from_raw_parts(p, 256).iter().all(|&b| b == 0));
            a.dealloc(p, layout);
        }
    }

    #[test]
    fn uninitialized_wrapper_is_transparent() {
        let a = PhcAllocator::new(System, PoolConfig::DEFAULT);
        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let p = a.alloc(layout);
            assert!(!p.is_null());
            assert!(!a.guard().owns(p));
            a.dealloc(p, layout);
        }
    }
}
