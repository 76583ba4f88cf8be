//! Verifies spec.md §8's P5 (zero-alloc audio thread): once a pipeline has
//! warmed up, driving its per-block `process` body allocates no heap memory.
//!
//! Grounded on `eraflo-KhoraEngine`'s `SaaTrackingAllocator` (counts bytes
//! through a thin `GlobalAlloc` wrapper around `System`), adapted down to a
//! single allocation counter since this test only needs to observe whether
//! the count moves, not a full memory-tracking facility.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use hotmic_engine::capture::CaptureManager;
use hotmic_engine::diagnostics::EngineCounters;
use hotmic_engine::pipeline::Pipeline;

static ALLOC_COUNT: AtomicU64 = AtomicU64::new(0);

struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[test]
fn test_steady_state_block_processing_allocates_nothing() {
    let block_size = 256;
    let (snapshot, _had_cycle) =
        hotmic_core::routing::RoutingSnapshot::build(vec![hotmic_core::routing::Channel::new(1, 48000.0)], &[], 48000.0, block_size);

    let mut pipeline = Pipeline::new(48000.0, block_size, 4800, None);
    let mut capture = CaptureManager::new();
    let counters = EngineCounters::new();
    let mut interleaved = vec![0.0f32; block_size * 2];

    // Warm up: the first handful of blocks may allocate (lazy ring
    // initialization, one-time smoother setup) before reaching steady state.
    for _ in 0..8 {
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);
    }

    let before = ALLOC_COUNT.load(Ordering::Relaxed);
    for _ in 0..64 {
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);
    }
    let after = ALLOC_COUNT.load(Ordering::Relaxed);

    assert_eq!(after, before, "steady-state block processing allocated {} time(s)", after - before);
}
