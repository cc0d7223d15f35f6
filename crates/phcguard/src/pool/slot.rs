use core::ptr::NonNull;

/// Occupancy of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Allocated,
    /// Freed and inaccessible; not reusable until the reuse delay has elapsed.
    QuarantinedAfterFree,
}

/// Per-slot record. Lives behind the slot's own mutex.
///
/// The allocation fields survive a free so that a later invalid free can
/// still report what was there; recycling clears them.
#[derive(Clone, Copy)]
pub(crate) struct SlotRecord {
    pub state: SlotState,
    pub generation: u32,
    pub addr: usize,
    pub size: usize,
    pub align: usize,
    pub call_site: usize,
    /// Event-clock time after which a quarantined slot may be recycled.
    pub reusable_at: u64,
}

impl SlotRecord {
    pub const fn new() -> Self {
        SlotRecord {
            state: SlotState::Free,
            generation: 0,
            addr: 0,
            size: 0,
            align: 0,
            call_site: 0,
            reusable_at: 0,
        }
    }

    pub fn recycle(&mut self) {
        debug_assert_eq!(self.state, SlotState::QuarantinedAfterFree);
        *self = SlotRecord {
            generation: self.generation.wrapping_add(1),
            ..SlotRecord::new()
        };
    }

    pub fn meta(&self, index: usize) -> SlotMeta {
        SlotMeta {
            index,
            state: self.state,
            generation: self.generation,
            addr: self.addr,
            size: self.size,
            align: self.align,
            call_site: self.call_site,
            reusable_at: self.reusable_at,
        }
    }
}

/// A read-only copy of a slot's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMeta {
    pub index: usize,
    pub state: SlotState,
    pub generation: u32,
    pub addr: usize,
    pub size: usize,
    pub align: usize,
    pub call_site: usize,
    pub reusable_at: u64,
}

/// Proof of a live guarded allocation.
///
/// The handle pins the slot generation it was issued for; releasing it after
/// the slot was freed or recycled is reported as an invalid free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    ptr: NonNull<u8>,
    index: u32,
    generation: u32,
}

unsafe impl Send for SlotHandle {}

impl SlotHandle {
    pub(crate) fn new(ptr: NonNull<u8>, index: usize, generation: u32) -> Self {
        SlotHandle {
            ptr,
            index: index as u32,
            generation,
        }
    }

    /// The allocation's address.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}
