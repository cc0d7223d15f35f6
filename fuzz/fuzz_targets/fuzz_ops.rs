#![no_main]

use libfuzzer_sys::fuzz_target;
use phcguard::{PoolConfig, SlotAllocator};

/// Fuzz target that interprets a byte slice as a sequence of slot
/// allocator operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=acquire, 1=release, 2=advance clock, 3=recycle)
///   byte 1-2: size (little-endian u16)
///   byte 3: low 3 bits = alignment shift, high bits = tracked index
///
/// We track up to 16 live handles over an 8-slot pool, so exhaustion and
/// recycling are both reached.
const MAX_TRACKED: usize = 16;

fuzz_target!(|data: &[u8]| {
    let Ok(pool) = SlotAllocator::new(PoolConfig {
        slots: 8,
        pages_per_slot: 1,
    }) else {
        return;
    };
    let cap = pool.slot_capacity();
    let mut tracked = [None; MAX_TRACKED];
    let mut now = 0u64;

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let align = 1usize << (data[i + 3] & 0x07);
        let index = (data[i + 3] >> 3) as usize % MAX_TRACKED;
        i += 4;
        now += 1;

        match opcode {
            0 => {
                if tracked[index].is_some() {
                    continue;
                }
                if let Some(h) = pool.try_acquire(size, align, index, now) {
                    let p = h.as_ptr();
                    assert_eq!(p as usize % align, 0);
                    assert!(size.max(1) <= cap);
                    // The whole allocation must be writable.
                    unsafe { std::ptr::write_bytes(p, 0xAA, size.max(1)) };
                    tracked[index] = Some(h);
                }
            }
            1 => {
                if let Some(h) = tracked[index].take() {
                    let meta = pool.release(h, now, size as u64 % 32).unwrap();
                    assert_eq!(meta.call_site, index);
                }
            }
            2 => now += size as u64,
            3 => {
                pool.maybe_recycle(now);
            }
            _ => unreachable!(),
        }

        let stats = pool.report().stats;
        assert_eq!(stats.live, tracked.iter().flatten().count());
        assert!(stats.live + stats.quarantined <= pool.len());
    }

    for h in tracked.into_iter().flatten() {
        pool.release(h, now, 0).unwrap();
    }
});
