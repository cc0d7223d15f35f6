//! Slot allocator: the guarded page pool and its per-slot metadata.

pub mod region;
mod slot;

pub use region::PageRegion;
pub use slot::{SlotHandle, SlotMeta, SlotState};

use crate::config::PoolConfig;
use crate::error::PhcError;
use crate::platform;
use crate::stats::{Counters, PhcReport};
use crate::sync::{Mutex, MutexGuard};
use crate::util::{align_down, align_up, page_size};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use slot::SlotRecord;

/// Hands out guarded slots and takes them back.
///
/// Each slot has its own lock, so operations on different slots never
/// contend. The stats lock is only ever taken while a slot lock is held
/// (slot -> stats), never the other way round. Nothing here calls into the
/// general allocator: the metadata table is mapped straight from the OS.
pub struct SlotAllocator {
    region: PageRegion,
    table: NonNull<Mutex<SlotRecord>>,
    table_size: usize,
    cursor: AtomicUsize,
    counters: Mutex<Counters>,
}

unsafe impl Send for SlotAllocator {}
unsafe impl Sync for SlotAllocator {}

impl SlotAllocator {
    pub fn new(config: PoolConfig) -> Result<Self, PhcError> {
        let region = PageRegion::map(config)?;
        let count = region.slot_count();

        let table_size = align_up(count * core::mem::size_of::<Mutex<SlotRecord>>(), page_size());
        let mem = unsafe { platform::map_anonymous(table_size) } as *mut Mutex<SlotRecord>;
        let table = NonNull::new(mem).ok_or(PhcError::MapFailed { bytes: table_size })?;
        for i in 0..count {
            unsafe { table.as_ptr().add(i).write(Mutex::new(SlotRecord::new())) };
        }

        Ok(SlotAllocator {
            region,
            table,
            table_size,
            cursor: AtomicUsize::new(0),
            counters: Mutex::new(Counters::new()),
        })
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.region.slot_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest allocation a slot can hold.
    #[inline]
    pub fn slot_capacity(&self) -> usize {
        self.region.slot_size()
    }

    pub fn region(&self) -> &PageRegion {
        &self.region
    }

    #[inline]
    fn slot(&self, index: usize) -> &Mutex<SlotRecord> {
        debug_assert!(index < self.len());
        unsafe { &*self.table.as_ptr().add(index) }
    }

    /// Place an allocation of `size` bytes in a free slot.
    ///
    /// Returns `None` when the request cannot be guarded (too large, bad
    /// alignment) or when every slot is taken even after recycling the
    /// quarantined slots that are due at `now`. The caller then uses the
    /// general allocator.
    ///
    /// The allocation is pushed against the end of the slot so that an
    /// overrun reaches the trailing guard page as soon as alignment allows.
    pub fn try_acquire(
        &self,
        size: usize,
        align: usize,
        call_site: usize,
        now: u64,
    ) -> Option<SlotHandle> {
        let size = size.max(1);
        let align = align.max(1);
        if !align.is_power_of_two() || align > page_size() || size > self.slot_capacity() {
            return None;
        }

        if let Some(handle) = self.acquire_free(size, align, call_site) {
            return Some(handle);
        }
        if self.maybe_recycle(now) > 0 {
            return self.acquire_free(size, align, call_site);
        }
        None
    }

    /// Same as `try_acquire`, with exhaustion reported as an error.
    pub fn acquire(
        &self,
        size: usize,
        align: usize,
        call_site: usize,
        now: u64,
    ) -> Result<SlotHandle, PhcError> {
        self.try_acquire(size, align, call_site, now)
            .ok_or(PhcError::PoolExhausted)
    }

    fn acquire_free(&self, size: usize, align: usize, call_site: usize) -> Option<SlotHandle> {
        let count = self.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;

        for k in 0..count {
            let index = (start + k) % count;
            // A busy slot is being acquired, released or recycled; skip it.
            let Some(mut slot) = self.slot(index).try_lock() else {
                continue;
            };
            if slot.state != SlotState::Free {
                continue;
            }
            if !self.region.commit(index) {
                return None;
            }

            let base = self.region.slot_base(index) as usize;
            let addr = align_down(base + self.slot_capacity() - size, align);
            slot.state = SlotState::Allocated;
            slot.addr = addr;
            slot.size = size;
            slot.align = align;
            slot.call_site = call_site;
            slot.reusable_at = 0;
            let generation = slot.generation;

            self.counters.lock().on_acquire(self.slot_capacity() - size);
            drop(slot);

            let ptr = NonNull::new(addr as *mut u8)?;
            return Some(SlotHandle::new(ptr, index, generation));
        }
        None
    }

    /// Free a guarded allocation by handle.
    ///
    /// The slot's pages are made inaccessible immediately and the slot is
    /// quarantined until the event clock reaches `now + reuse_delay`.
    pub fn release(
        &self,
        handle: SlotHandle,
        now: u64,
        reuse_delay: u64,
    ) -> Result<SlotMeta, PhcError> {
        let index = handle.index();
        if index >= self.len() {
            return Err(PhcError::InvalidPointer {
                addr: handle.as_ptr() as usize,
                index,
            });
        }
        let mut slot = self.slot(index).lock();
        if slot.state != SlotState::Allocated || slot.generation != handle.generation() {
            return Err(invalid_handle(index, handle.generation(), &slot));
        }
        Ok(self.release_locked(index, &mut slot, now, reuse_delay))
    }

    /// Free a guarded allocation by address, as `free()` would.
    ///
    /// `ptr` must be inside the pool (see [`contains`](Self::contains)).
    ///
    /// An address carries no generation. If a slot has been recycled and its
    /// new tenant has the same size and alignment, a late free of the old
    /// pointer releases the new tenant without complaint; only frees through
    /// a [`SlotHandle`] (see [`release`](Self::release)) catch that case.
    pub fn release_ptr(
        &self,
        ptr: *mut u8,
        now: u64,
        reuse_delay: u64,
    ) -> Result<SlotMeta, PhcError> {
        let addr = ptr as usize;
        let index = match self.region.locate(addr) {
            Some(Ok(index)) => index,
            Some(Err(nearest)) => return Err(PhcError::InvalidPointer { addr, index: nearest }),
            None => return Err(PhcError::InvalidPointer { addr, index: usize::MAX }),
        };

        let mut slot = self.slot(index).lock();
        if slot.state != SlotState::Allocated {
            let generation = slot.generation;
            return Err(invalid_handle(index, generation, &slot));
        }
        if slot.addr != addr {
            return Err(PhcError::InvalidPointer { addr, index });
        }
        Ok(self.release_locked(index, &mut slot, now, reuse_delay))
    }

    fn release_locked(
        &self,
        index: usize,
        slot: &mut MutexGuard<'_, SlotRecord>,
        now: u64,
        reuse_delay: u64,
    ) -> SlotMeta {
        self.region.decommit(index);
        slot.state = SlotState::QuarantinedAfterFree;
        slot.reusable_at = now.saturating_add(reuse_delay);
        self.counters
            .lock()
            .on_release(self.slot_capacity() - slot.size);
        slot.meta(index)
    }

    /// Return every quarantined slot whose reuse time has come back to the
    /// free list, bumping its generation. Returns how many were recycled.
    pub fn maybe_recycle(&self, now: u64) -> usize {
        let mut recycled = 0;
        for index in 0..self.len() {
            let Some(mut slot) = self.slot(index).try_lock() else {
                continue;
            };
            if slot.state == SlotState::QuarantinedAfterFree && slot.reusable_at <= now {
                slot.recycle();
                self.counters.lock().on_recycle(1);
                recycled += 1;
            }
        }
        recycled
    }

    /// Whether `ptr` lies anywhere in the pool, guard pages included.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.contains(ptr as usize)
    }

    /// Requested size of the live allocation starting at `ptr`.
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let index = self.region.locate(addr)?.ok()?;
        let slot = self.slot(index).lock();
        (slot.state == SlotState::Allocated && slot.addr == addr).then_some(slot.size)
    }

    pub fn meta(&self, index: usize) -> Option<SlotMeta> {
        (index < self.len()).then(|| self.slot(index).lock().meta(index))
    }

    /// Consistent snapshot of the usage counters.
    pub fn report(&self) -> PhcReport {
        self.counters.lock().report(self.len())
    }
}

impl Drop for SlotAllocator {
    fn drop(&mut self) {
        unsafe { platform::unmap(self.table.as_ptr() as *mut u8, self.table_size) };
    }
}

fn invalid_handle(index: usize, generation: u32, slot: &SlotRecord) -> PhcError {
    PhcError::InvalidHandle {
        index,
        generation,
        expected: slot.generation,
        state: slot.state,
        size: slot.size,
        call_site: slot.call_site,
    }
}
