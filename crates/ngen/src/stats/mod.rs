//! Stats Module - Allocation Counters
//!
//! Two process-wide counters, updated on every allocation request:
//! - Cumulative allocation count
//! - Cumulative allocated bytes
//!
//! Updates are relaxed atomic adds. Readers on other threads see them
//! eventually, with no bound on the delay.
//!
//! Each dispatcher additionally keeps its own path counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATION_COUNT: AtomicU64 = AtomicU64::new(0);
static ALLOCATION_BYTES: AtomicU64 = AtomicU64::new(0);

/// Count one allocation request of `bytes` bytes.
#[inline]
pub fn record_object_allocation(bytes: u64) {
    ALLOCATION_COUNT.fetch_add(1, Ordering::Relaxed);
    ALLOCATION_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

/// Allocation requests since process start.
pub fn allocation_count() -> u64 {
    ALLOCATION_COUNT.load(Ordering::Relaxed)
}

/// Bytes requested since process start.
pub fn allocation_bytes() -> u64 {
    ALLOCATION_BYTES.load(Ordering::Relaxed)
}

/// Snapshot of the process-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAllocationStats {
    pub allocation_count: u64,
    pub allocation_bytes: u64,
}

impl GlobalAllocationStats {
    pub fn snapshot() -> Self {
        Self {
            allocation_count: allocation_count(),
            allocation_bytes: allocation_bytes(),
        }
    }
}

/// Per-dispatcher path counters
#[derive(Debug, Default)]
pub struct DispatcherCounters {
    pub(crate) pool_allocations: AtomicU64,
    pub(crate) pool_refills: AtomicU64,
    pub(crate) global_allocations: AtomicU64,
    pub(crate) directed_allocations: AtomicU64,
    pub(crate) out_of_memory: AtomicU64,
}

impl DispatcherCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            pool_allocations: self.pool_allocations.load(Ordering::Relaxed),
            pool_refills: self.pool_refills.load(Ordering::Relaxed),
            global_allocations: self.global_allocations.load(Ordering::Relaxed),
            directed_allocations: self.directed_allocations.load(Ordering::Relaxed),
            out_of_memory: self.out_of_memory.load(Ordering::Relaxed),
            global: GlobalAllocationStats::snapshot(),
        }
    }
}

/// Snapshot of one dispatcher's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Served from a thread-local pool without refilling
    pub pool_allocations: u64,
    /// Served from a thread-local pool right after refilling it
    pub pool_refills: u64,
    /// Served by the global heap
    pub global_allocations: u64,
    /// Requests that carried a non-default target generation
    pub directed_allocations: u64,
    /// Requests the global heap refused
    pub out_of_memory: u64,
    /// Process-wide counters at snapshot time
    pub global: GlobalAllocationStats,
}

impl DispatcherStats {
    /// Successful allocations
    pub fn total_allocations(&self) -> u64 {
        self.pool_allocations + self.pool_refills + self.global_allocations
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
