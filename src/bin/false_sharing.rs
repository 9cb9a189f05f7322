//! Demonstrates why the ring keeps its hot atomics on separate cache lines.
//!
//! Four counter workloads performing the same number of increments:
//!
//! - `sequential`     - one thread, one atomic (the baseline)
//! - `direct sharing` - all threads hammer one atomic (true contention)
//! - `false sharing`  - per-thread atomics packed into adjacent words, so
//!   threads that never touch each other's counter still fight over the
//!   same cache lines
//! - `padded`         - per-thread atomics on their own 64-byte lines
//!
//! On typical hardware `false sharing` lands close to `direct sharing`
//! despite having zero logical contention, and `padded` recovers most of
//! the `sequential` rate. The same effect is why `push_index`, `pop_index`,
//! and the size counter each get a cache line of their own.
//!
//! Usage:
//!     cargo run --release --bin false_sharing

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use minstant::Instant;

const NUM_THREADS: usize = 8;
const MAX_COUNT: u64 = 1 << 27;
const COUNT_PER_THREAD: u64 = MAX_COUNT / NUM_THREADS as u64;

#[repr(align(64))]
struct PaddedCounter(AtomicU64);

fn sequential() -> u64 {
    let counter = AtomicU64::new(0);
    for _ in 0..MAX_COUNT {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    counter.load(Ordering::Relaxed)
}

fn direct_sharing() -> u64 {
    let counter = AtomicU64::new(0);
    thread::scope(|s| {
        for _ in 0..NUM_THREADS {
            s.spawn(|| {
                for _ in 0..COUNT_PER_THREAD {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    counter.load(Ordering::Relaxed)
}

fn false_sharing() -> u64 {
    // Eight adjacent words: one or two cache lines for all eight threads.
    let counters: Vec<AtomicU64> = (0..NUM_THREADS).map(|_| AtomicU64::new(0)).collect();
    thread::scope(|s| {
        for counter in &counters {
            s.spawn(move || {
                for _ in 0..COUNT_PER_THREAD {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
}

fn padded() -> u64 {
    let counters: Vec<PaddedCounter> = (0..NUM_THREADS)
        .map(|_| PaddedCounter(AtomicU64::new(0)))
        .collect();
    thread::scope(|s| {
        for counter in &counters {
            s.spawn(move || {
                for _ in 0..COUNT_PER_THREAD {
                    counter.0.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    counters.iter().map(|c| c.0.load(Ordering::Relaxed)).sum()
}

fn run(name: &str, workload: impl FnOnce() -> u64) {
    let start = Instant::now();
    let total = workload();
    let elapsed = start.elapsed();
    let per_ms = total as u128 * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{name:>14}: {} ms ({per_ms} increments/ms)", elapsed.as_millis());
    assert_eq!(total, MAX_COUNT);
}

fn main() {
    println!("{MAX_COUNT} increments across {NUM_THREADS} threads:");
    run("sequential", sequential);
    run("direct sharing", direct_sharing);
    run("false sharing", false_sharing);
    run("padded", padded);
}
