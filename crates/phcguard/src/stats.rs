//! Usage figures for telemetry.

use serde::Serialize;

/// Memory overhead of live guarded allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    /// Bytes of slot space not covered by the allocation inside it (slop).
    pub fragmentation_bytes: usize,
}

/// Slot counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhcStats {
    /// Slots ever handed out.
    pub slots_allocated: u64,
    /// Slots ever freed.
    pub slots_freed: u64,
    /// Slots currently allocated.
    pub live: usize,
    /// Slots freed and not yet recycled.
    pub quarantined: usize,
    /// Total slots in the pool. Unused = capacity - live - quarantined.
    pub capacity: usize,
}

impl PhcStats {
    pub fn unused(&self) -> usize {
        self.capacity - self.live - self.quarantined
    }
}

/// What `record_and_report_stats` emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhcReport {
    pub usage: MemoryUsage,
    pub stats: PhcStats,
}

/// Counters maintained by the slot allocator under its stats lock.
#[derive(Clone, Copy, Default)]
pub(crate) struct Counters {
    pub slots_allocated: u64,
    pub slots_freed: u64,
    pub live: usize,
    pub quarantined: usize,
    pub fragmentation_bytes: usize,
}

impl Counters {
    pub const fn new() -> Self {
        Counters {
            slots_allocated: 0,
            slots_freed: 0,
            live: 0,
            quarantined: 0,
            fragmentation_bytes: 0,
        }
    }

    pub fn on_acquire(&mut self, slop: usize) {
        self.slots_allocated += 1;
        self.live += 1;
        self.fragmentation_bytes += slop;
    }

    pub fn on_release(&mut self, slop: usize) {
        self.slots_freed += 1;
        self.live -= 1;
        self.quarantined += 1;
        self.fragmentation_bytes -= slop;
    }

    pub fn on_recycle(&mut self, count: usize) {
        self.quarantined -= count;
    }

    pub fn report(&self, capacity: usize) -> PhcReport {
        PhcReport {
            usage: MemoryUsage {
                fragmentation_bytes: self.fragmentation_bytes,
            },
            stats: PhcStats {
                slots_allocated: self.slots_allocated,
                slots_freed: self.slots_freed,
                live: self.live,
                quarantined: self.quarantined,
                capacity,
            },
        }
    }
}
