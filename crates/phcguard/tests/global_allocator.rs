#![cfg(feature = "global-allocator")]

use std::alloc::System;
use std::sync::Once;

use phcguard::{PhcAllocator, PhcConfig, PoolConfig, ProbabilityConfig, ProcessRole};

#[global_allocator]
static GLOBAL: PhcAllocator<System> = PhcAllocator::new(System, PoolConfig::DEFAULT);

static INIT: Once = Once::new();

/// Guard roughly one allocation in four for the whole test binary.
fn init() {
    INIT.call_once(|| {
        let tier = ProbabilityConfig {
            first: 1,
            normal: 4,
            page_reuse: 8,
        };
        let config = PhcConfig {
            enabled: true,
            min_ram_mb: 0,
            avg_delay: tier,
            content_avg_delay: tier,
        };
        GLOBAL
            .guard()
            .init(ProcessRole::LongLived, &config)
            .expect("guard init failed");
    });
}

#[test]
fn basic_alloc_and_free() {
    init();

    let b = Box::new(42u64);
    assert_eq!(*b, 42);
    drop(b);

    let mut v: Vec<u32> = Vec::new();
    for i in 0..1000 {
        v.push(i);
    }
    assert_eq!(v.len(), 1000);
    assert_eq!(v[999], 999);
    drop(v);

    let s = String::from("hello, guarded global allocator!");
    assert_eq!(s, "hello, guarded global allocator!");
    drop(s);
}

#[test]
fn some_allocations_are_guarded() {
    init();

    let boxes: Vec<Box<[u8; 64]>> = (0..200).map(|_| Box::new([7u8; 64])).collect();
    let guarded = boxes
        .iter()
        .filter(|b| GLOBAL.guard().owns(b.as_ptr()))
        .count();
    assert!(guarded > 0, "no allocation was guarded");
    assert!(guarded < boxes.len(), "every allocation was guarded");
    assert!(boxes.iter().all(|b| b.iter().all(|&x| x == 7)));
}

#[test]
fn zero_size_alloc() {
    init();

    let mut v: Vec<()> = Vec::new();
    for _ in 0..100 {
        v.push(());
    }
    assert_eq!(v.len(), 100);

    let v: Vec<u8> = Vec::new();
    assert_eq!(v.len(), 0);
}

#[test]
fn aligned_alloc() {
    use std::alloc::{alloc, dealloc, Layout};
    init();

    for &align in &[8usize, 64, 128, 4096] {
        let layout = Layout::from_size_align(256, align).unwrap();
        for _ in 0..32 {
            unsafe {
                let ptr = alloc(layout);
                assert!(!ptr.is_null());
                assert_eq!(ptr as usize % align, 0, "{:p} is not {}-aligned", ptr, align);
                ptr.write_bytes(0x33, 256);
                dealloc(ptr, layout);
            }
        }
    }
}

#[test]
fn large_alloc_passes_through() {
    init();

    let page = phcguard::util::page_size();
    let v = vec![1u8; page * 4];
    assert!(!GLOBAL.guard().owns(v.as_ptr()));
    assert_eq!(v.iter().map(|&b| b as usize).sum::<usize>(), page * 4);
}

#[test]
fn realloc_growth_keeps_contents() {
    init();

    let mut v: Vec<u64> = Vec::with_capacity(1);
    for i in 0..10_000u64 {
        v.push(i);
    }
    assert!(v.iter().enumerate().all(|(i, &x)| x == i as u64));

    let mut s = String::new();
    for i in 0..500 {
        s.push_str(&i.to_string());
        s.shrink_to_fit();
    }
    assert!(s.starts_with("0123456789101112"));
}

#[test]
fn calloc_style_zeroing() {
    init();

    for _ in 0..64 {
        let v = vec![0u8; 512];
        assert!(v.iter().all(|&b| b == 0));
    }
}

#[test]
fn threads_share_the_guard() {
    init();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            std::thread::spawn(move || {
                let mut keep = Vec::new();
                for i in 0..2_000 {
                    keep.push(vec![t as u8; 16 + i % 200]);
                    if keep.len() > 32 {
                        keep.remove(0);
                    }
                }
                keep.iter().all(|v| v.iter().all(|&b| b == t as u8))
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
    assert!(GLOBAL.guard().stats().slots_allocated > 0);
}
