/// Microbenchmarks for the guard hooks.
///
/// The binary installs the guard as its global allocator, so the threaded
/// and mixed-size numbers include the sampling cost on every allocation.
/// The hook numbers call `on_alloc`/`on_free` on a private guard.
use std::alloc::System;
use std::hint::black_box;
use std::time::Instant;

use phcguard::{PhcAllocator, PhcConfig, PhcGuard, PoolConfig, ProbabilityConfig, ProcessRole};

#[global_allocator]
static GLOBAL: PhcAllocator<System> = PhcAllocator::new(System, PoolConfig::DEFAULT);

fn tiers(mean: u32) -> PhcConfig {
    let tier = ProbabilityConfig {
        first: mean,
        normal: mean,
        page_reuse: mean,
    };
    PhcConfig {
        enabled: true,
        min_ram_mb: 0,
        avg_delay: tier,
        content_avg_delay: tier,
    }
}

/// Cost of the hooks when the sampler says no. This is the path every
/// allocation in the process takes.
fn bench_hook_miss(config: &PhcConfig, iterations: usize) -> f64 {
    let guard = PhcGuard::new(PoolConfig::DEFAULT);
    if guard.init_seeded(ProcessRole::LongLived, config, 1).is_err() {
        return f64::NAN;
    }
    let mut dummy = 0u8;
    let foreign = &mut dummy as *mut u8;

    let start = Instant::now();
    for _ in 0..iterations {
        if let Some(p) = guard.on_alloc(black_box(64), 8, 0) {
            guard.on_free(p.as_ptr());
        }
        black_box(guard.on_free(black_box(foreign)));
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// Cost of a guarded allocation and free, including the page protection
/// changes.
fn bench_guarded_alloc_free(size: usize, iterations: usize) -> f64 {
    let guard = PhcGuard::new(PoolConfig {
        slots: 64,
        pages_per_slot: 1,
    });
    if guard
        .init_seeded(ProcessRole::LongLived, &tiers(1), 2)
        .is_err()
    {
        return f64::NAN;
    }

    let mut guarded = 0usize;
    let start = Instant::now();
    for _ in 0..iterations {
        if let Some(p) = guard.on_alloc(black_box(size), 16, 0) {
            unsafe { std::ptr::write_bytes(p.as_ptr(), 0xAB, size.min(64)) };
            guard.on_free(black_box(p.as_ptr()));
            guarded += 1;
        }
    }
    let elapsed = start.elapsed();
    if guarded < iterations {
        println!("  ({} of {} fell back)", iterations - guarded, iterations);
    }
    elapsed.as_nanos() as f64 / iterations as f64
}

/// Measure multi-threaded throughput through the global allocator.
fn bench_threaded_throughput(num_threads: usize, ops_per_thread: usize, size: usize) -> f64 {
    let start = Instant::now();
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            std::thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let mut v: Vec<u8> = Vec::with_capacity(black_box(size));
                    v.push(0xCD);
                    black_box(&v);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    let total_ops = num_threads * ops_per_thread;
    total_ops as f64 / elapsed.as_secs_f64()
}

fn main() {
    let iterations = 1_000_000;

    let defaults = PhcConfig::default();
    if GLOBAL
        .guard()
        .init(ProcessRole::LongLived, &tiers(defaults.avg_delay.normal))
        .is_err()
    {
        eprintln!("guard pool unavailable, running unguarded");
    }

    println!("=== phcguard microbenchmarks ===\n");

    println!("--- hook miss (ns/op) ---");
    let disabled = PhcConfig {
        enabled: false,
        ..defaults
    };
    let miss_disabled = bench_hook_miss(&disabled, iterations);
    println!("  disabled:        {:>8.1} ns", miss_disabled);
    let miss_enabled = bench_hook_miss(&tiers(defaults.avg_delay.normal), iterations);
    println!("  enabled, 1/{}: {:>8.1} ns", defaults.avg_delay.normal, miss_enabled);

    println!("\n--- guarded alloc/free (ns/op) ---");
    let mut latencies: Vec<(usize, f64)> = Vec::new();
    for &size in &[16, 256, 1024, 4096] {
        let ns = bench_guarded_alloc_free(size, iterations / 10);
        println!("  size={:>6}: {:>8.1} ns", size, ns);
        latencies.push((size, ns));
    }

    println!("\n--- multi-threaded throughput, global allocator (Mops/sec) ---");
    let mut key_throughput_1t = 0.0f64;
    let mut key_throughput_4t = 0.0f64;
    for &threads in &[1, 2, 4, 8] {
        let ops_sec = bench_threaded_throughput(threads, iterations / threads, 64);
        let mops = ops_sec / 1_000_000.0;
        println!("  threads={}: {:>6.2} Mops/sec", threads, mops);
        if threads == 1 {
            key_throughput_1t = mops;
        }
        if threads == 4 {
            key_throughput_4t = mops;
        }
    }

    if let Some(report) = GLOBAL.guard().shutdown() {
        println!(
            "\n  guarded {} allocations, {} live at exit",
            report.stats.slots_allocated, report.stats.live
        );
    }

    print!(
        "\nSUMMARY|miss_disabled={:.1}|miss_enabled={:.1}",
        miss_disabled, miss_enabled
    );
    for &(size, ns) in &latencies {
        print!("|guarded_{}={:.1}", size, ns);
    }
    println!(
        "|throughput_1t={:.2}|throughput_4t={:.2}",
        key_throughput_1t, key_throughput_4t
    );
}
