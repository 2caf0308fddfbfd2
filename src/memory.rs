//! Live-memory gauges backed by an allocator wrapper.
//!
//! Bytes in use are not additive across threads: a block freed by another
//! thread than the one that allocated it would make per-thread sums
//! meaningless. The memory counters are therefore registered with a
//! [`CombineHandler`](crate::CombineHandler) that reads the allocator's own
//! statistics at aggregation time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use conteggi::memory::{register_memory_counters, TrackingAllocator};
//!
//! #[global_allocator]
//! static ALLOC: TrackingAllocator = TrackingAllocator::system();
//!
//! let counters = conteggi::global::counters();
//! register_memory_counters(counters, &ALLOC);
//! ```
//!
//! A second call returns the existing handles, so the allocator can be
//! wired in from code that may run more than once.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::counters::Counters;
use crate::error::{fatal, CounterError, OrFatal};
use crate::registry::{CombineHandler, Handle, ThreadSelector};

/// Name of the live bytes gauge.
pub const ALLOCATED: &str = "memory.allocated";

/// Name of the allocation calls counter.
pub const ALLOCATIONS: &str = "memory.allocations";

/// Source of allocator statistics.
pub trait AllocationStats: Send + Sync {
    /// Bytes currently allocated.
    fn allocated_bytes(&self) -> u64;

    /// Allocation calls since start.
    fn allocation_count(&self) -> u64;
}

/// A [`GlobalAlloc`] wrapper counting live bytes and allocation calls.
#[derive(Debug)]
pub struct TrackingAllocator<A = System> {
    inner: A,
    live: AtomicU64,
    allocations: AtomicU64,
}

impl TrackingAllocator<System> {
    /// Wraps the system allocator.
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A> TrackingAllocator<A> {
    /// Wraps `inner`.
    pub const fn new(inner: A) -> Self {
        TrackingAllocator {
            inner,
            live: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
        }
    }
}

// SAFETY: every call is forwarded unchanged to `inner`; only counters are
// updated around it.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            self.live.fetch_add(layout.size() as u64, Ordering::Relaxed);
            self.allocations.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.live.fetch_add(layout.size() as u64, Ordering::Relaxed);
            self.allocations.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        self.live.fetch_sub(layout.size() as u64, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            self.live.fetch_add(new_size as u64, Ordering::Relaxed);
            self.live.fetch_sub(layout.size() as u64, Ordering::Relaxed);
        }
        new_ptr
    }
}

impl<A: Send + Sync> AllocationStats for TrackingAllocator<A> {
    fn allocated_bytes(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// Handles of the memory counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCounters {
    /// [`ALLOCATED`]
    pub allocated: Handle,
    /// [`ALLOCATIONS`]
    pub allocations: Handle,
}

/// Registers the memory counters on `counters`, or returns them if they are
/// already registered.
///
/// Both report the allocator's figures for [`ThreadSelector::All`] and 0 for
/// a single slot or the shared block, since the allocator does not track
/// threads.
pub fn register_memory_counters<S>(counters: &Counters, stats: &'static S) -> MemoryCounters
where
    S: AllocationStats + ?Sized,
{
    let allocated = register_gauge(counters, ALLOCATED, move |selector: ThreadSelector| {
        match selector {
            ThreadSelector::All => stats.allocated_bytes(),
            _ => 0,
        }
    });
    let allocations = register_gauge(counters, ALLOCATIONS, move |selector: ThreadSelector| {
        match selector {
            ThreadSelector::All => stats.allocation_count(),
            _ => 0,
        }
    });
    MemoryCounters {
        allocated,
        allocations,
    }
}

/// Registers `name` with `handler`, or returns the handle a concurrent or
/// earlier registration got.
fn register_gauge<C>(counters: &Counters, name: &str, handler: C) -> Handle
where
    C: CombineHandler + 'static,
{
    if let Some(handle) = counters.lookup(name) {
        return handle;
    }
    match counters.try_register_with_combine(name, handler) {
        Err(CounterError::DuplicateName(name)) => counters
            .lookup(&name)
            .unwrap_or_else(|| fatal(CounterError::DuplicateName(name))),
        result => result.or_fatal(),
    }
}
