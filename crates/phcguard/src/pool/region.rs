use crate::config::PoolConfig;
use crate::error::PhcError;
use crate::platform;
use crate::util::{init_page_size, page_size};

/// The guarded address range backing every slot.
///
/// Layout: `[guard] [slot 0] [guard] [slot 1] [guard] ... [slot n-1] [guard]`
///
/// Guard pages are one OS page each and stay `PROT_NONE` for the life of the
/// region. Slot pages are `PROT_NONE` except while the slot is allocated.
pub struct PageRegion {
    base: *mut u8,
    total_size: usize,
    slot_count: usize,
    slot_size: usize,
    guard_size: usize,
}

unsafe impl Send for PageRegion {}
unsafe impl Sync for PageRegion {}

impl PageRegion {
    pub fn map(config: PoolConfig) -> Result<Self, PhcError> {
        if config.slots == 0 {
            return Err(PhcError::InvalidPool("pool needs at least one slot"));
        }
        if config.slots > u32::MAX as usize {
            return Err(PhcError::InvalidPool("too many slots"));
        }
        if config.pages_per_slot == 0 {
            return Err(PhcError::InvalidPool("slots need at least one page"));
        }

        init_page_size();
        let guard_size = page_size();
        let slot_size = config
            .pages_per_slot
            .checked_mul(guard_size)
            .ok_or(PhcError::InvalidPool("slot size overflows"))?;
        let total_size = slot_size
            .checked_add(guard_size)
            .and_then(|stride| stride.checked_mul(config.slots))
            .and_then(|n| n.checked_add(guard_size))
            .ok_or(PhcError::InvalidPool("pool size overflows"))?;

        let base = unsafe { platform::reserve(total_size) };
        if base.is_null() {
            return Err(PhcError::MapFailed { bytes: total_size });
        }

        Ok(PageRegion {
            base,
            total_size,
            slot_count: config.slots,
            slot_size,
            guard_size,
        })
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Bytes available to one allocation.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    fn stride(&self) -> usize {
        self.slot_size + self.guard_size
    }

    #[inline]
    pub fn slot_base(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.slot_count);
        unsafe { self.base.add(self.guard_size + index * self.stride()) }
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base as usize;
        addr >= base && addr < base + self.total_size
    }

    /// Slot whose pages hold `addr`, or `Err(nearest)` if `addr` is in a guard
    /// page of the region. `None` if `addr` is outside the region.
    pub fn locate(&self, addr: usize) -> Option<Result<usize, usize>> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.base as usize;
        if offset < self.guard_size {
            return Some(Err(0));
        }
        let offset = offset - self.guard_size;
        let index = offset / self.stride();
        debug_assert!(index < self.slot_count);
        if offset % self.stride() < self.slot_size {
            Some(Ok(index))
        } else {
            Some(Err(index))
        }
    }

    /// Make a slot's pages accessible.
    pub fn commit(&self, index: usize) -> bool {
        unsafe { platform::protect_read_write(self.slot_base(index), self.slot_size) }
    }

    /// Revoke access to a slot's pages and hand the physical memory back.
    pub fn decommit(&self, index: usize) {
        let base = self.slot_base(index);
        unsafe {
            let revoked = platform::protect_none(base, self.slot_size);
            debug_assert!(revoked, "mprotect(PROT_NONE) failed on slot {index}");
            platform::advise_free(base, self.slot_size);
        }
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        unsafe { platform::unmap(self.base, self.total_size) };
    }
}
