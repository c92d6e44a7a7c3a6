//! TLAB - Thread-Local Allocation Buffer
//!
//! Each mutator thread owns one buffer per generation and bump-allocates
//! from it without atomics or locks.
//!
//! ## How it works
//!
//! 1. Thread allocates from the buffer of the chosen generation
//! 2. Buffer full: the pools retire it and carve a fresh one out of the
//!    global heap, unless too much of the old one would be wasted
//! 3. Refill impossible: the dispatcher goes to the global heap
//!
//! Only the refill step takes a lock, on the per-thread usage registry.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocator::heap::GlobalHeap;
use crate::error::{NgenError, Result};
use crate::logging::{log_enabled, log_event, AllocEvent, LogLevel};
use crate::object::{HeapWord, HEADER_WORDS};
use crate::thread::{MutatorThread, ThreadId};
use crate::util::constants::{HEAP_WORD_SIZE, MIN_TLAB_WORDS};

/// Fraction of a buffer that may be thrown away by a refill.
const REFILL_WASTE_FRACTION: usize = 64;

/// TLAB - private bump buffer of one thread for one generation
#[derive(Debug)]
pub struct Tlab {
    start: Cell<usize>,
    top: Cell<usize>,
    end: Cell<usize>,
    allocation_count: Cell<u64>,
    refill_count: Cell<u64>,
}

impl Tlab {
    /// Empty buffer; the first allocation fails until it is filled.
    pub fn new() -> Self {
        Self {
            start: Cell::new(0),
            top: Cell::new(0),
            end: Cell::new(0),
            allocation_count: Cell::new(0),
            refill_count: Cell::new(0),
        }
    }

    /// Bump-allocate `words` heap words. `None` when they do not fit.
    #[inline]
    pub fn allocate(&self, words: usize) -> Option<NonNull<HeapWord>> {
        let top = self.top.get();
        let new_top = top.checked_add(words.checked_mul(HEAP_WORD_SIZE)?)?;
        if new_top > self.end.get() {
            return None;
        }
        let obj = NonNull::new(top as *mut HeapWord)?;
        self.top.set(new_top);
        self.allocation_count.set(self.allocation_count.get() + 1);
        Some(obj)
    }

    /// Start allocating from `[start, start + words)`.
    pub fn fill(&self, start: NonNull<HeapWord>, words: usize) {
        let start = start.as_ptr() as usize;
        self.start.set(start);
        self.top.set(start);
        self.end.set(start + words * HEAP_WORD_SIZE);
        self.refill_count.set(self.refill_count.get() + 1);
    }

    /// Stop allocating from the current buffer. Returns the unused words.
    pub fn retire(&self) -> usize {
        let unused = self.remaining_words();
        self.start.set(0);
        self.top.set(0);
        self.end.set(0);
        unused
    }

    pub fn remaining_words(&self) -> usize {
        (self.end.get() - self.top.get()) / HEAP_WORD_SIZE
    }

    pub fn capacity_words(&self) -> usize {
        (self.end.get() - self.start.get()) / HEAP_WORD_SIZE
    }

    pub fn used_bytes(&self) -> usize {
        self.top.get() - self.start.get()
    }

    pub fn is_empty(&self) -> bool {
        self.end.get() == 0
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.get()
    }

    pub fn refill_count(&self) -> u64 {
        self.refill_count.get()
    }
}

impl Default for Tlab {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-local pool primitive.
pub trait ThreadLocalPools: Send + Sync {
    /// Allocate from `thread`'s pool for `generation`. Never blocks.
    fn allocate(&self, thread: &MutatorThread, generation: u32, words: usize) -> Option<NonNull<HeapWord>>;

    /// Refill `thread`'s pool for `generation` and allocate from it. `None`
    /// sends the request to the global heap.
    fn allocate_slow(&self, thread: &MutatorThread, generation: u32, words: usize) -> Option<NonNull<HeapWord>>;
}

/// Per-thread pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolUsage {
    pub refills: u64,
    pub refill_words: u64,
    pub wasted_words: u64,
}

/// TlabPools - fixed-size pools refilled from a global heap
pub struct TlabPools {
    heap: Arc<dyn GlobalHeap>,
    tlab_words: usize,
    refills: AtomicU64,
    usage: Mutex<IndexMap<ThreadId, PoolUsage>>,
}

impl TlabPools {
    pub fn new(heap: Arc<dyn GlobalHeap>, tlab_words: usize) -> Result<Self> {
        if tlab_words < MIN_TLAB_WORDS.max(HEADER_WORDS) {
            return Err(NgenError::InvalidArgument(format!(
                "pool size ({} words) must be at least {} words",
                tlab_words, MIN_TLAB_WORDS
            )));
        }

        Ok(Self {
            heap,
            tlab_words,
            refills: AtomicU64::new(0),
            usage: Mutex::new(IndexMap::new()),
        })
    }

    pub fn tlab_words(&self) -> usize {
        self.tlab_words
    }

    /// Total refills over every thread.
    pub fn refill_count(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    pub fn usage(&self, thread: ThreadId) -> Option<PoolUsage> {
        self.usage.lock().get(&thread).copied()
    }

    /// Usage of every thread that ever refilled, in first-refill order.
    pub fn usage_by_thread(&self) -> Vec<(ThreadId, PoolUsage)> {
        self.usage
            .lock()
            .iter()
            .map(|(id, usage)| (*id, *usage))
            .collect()
    }

    /// Forget a thread that has exited.
    pub fn release_thread(&self, thread: &MutatorThread) {
        thread.retire_tlabs();
        self.usage.lock().shift_remove(&thread.id());
    }
}

impl ThreadLocalPools for TlabPools {
    #[inline]
    fn allocate(&self, thread: &MutatorThread, generation: u32, words: usize) -> Option<NonNull<HeapWord>> {
        thread.tlab(generation).allocate(words)
    }

    fn allocate_slow(&self, thread: &MutatorThread, generation: u32, words: usize) -> Option<NonNull<HeapWord>> {
        let tlab = thread.tlab(generation);

        // Keep the buffer if refilling would waste too much of it.
        if !tlab.is_empty() && tlab.remaining_words() > self.tlab_words / REFILL_WASTE_FRACTION {
            return None;
        }
        if words > self.tlab_words / 2 {
            return None;
        }

        let chunk = self.heap.allocate_pool_chunk(self.tlab_words, generation)?;

        thread.incr_allocated_bytes(tlab.used_bytes() as u64);
        let wasted = tlab.retire();
        tlab.fill(chunk, self.tlab_words);

        self.refills.fetch_add(1, Ordering::Relaxed);
        {
            let mut usage = self.usage.lock();
            let entry = usage.entry(thread.id()).or_default();
            entry.refills += 1;
            entry.refill_words += self.tlab_words as u64;
            entry.wasted_words += wasted as u64;
        }

        if log_enabled(LogLevel::Trace) {
            log_event(AllocEvent::PoolRefilled {
                thread: thread.id(),
                generation,
                words: self.tlab_words,
            });
        }

        tlab.allocate(words)
    }
}

impl std::fmt::Debug for TlabPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlabPools")
            .field("tlab_words", &self.tlab_words)
            .field("refills", &self.refill_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::heap::ArenaHeap;

    fn pools(tlab_words: usize) -> (Arc<ArenaHeap>, TlabPools) {
        let heap = Arc::new(ArenaHeap::new(1024 * 1024, 2).unwrap());
        let pools = TlabPools::new(heap.clone(), tlab_words).unwrap();
        (heap, pools)
    }

    #[test]
    fn test_empty_tlab_fails_fast() {
        let tlab = Tlab::new();
        assert!(tlab.is_empty());
        assert!(tlab.allocate(1).is_none());
    }

    #[test]
    fn test_tlab_bumps_within_buffer() {
        let mut backing = vec![0usize; 8];
        let tlab = Tlab::new();
        tlab.fill(NonNull::new(backing.as_mut_ptr()).unwrap(), 8);

        let a = tlab.allocate(3).unwrap();
        let b = tlab.allocate(5).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 3 * HEAP_WORD_SIZE);
        assert!(tlab.allocate(1).is_none());
        assert_eq!(tlab.allocation_count(), 2);
        assert_eq!(tlab.retire(), 0);
    }

    #[test]
    fn test_rejects_tiny_pools() {
        let heap = Arc::new(ArenaHeap::new(4096, 1).unwrap());
        assert!(TlabPools::new(heap, 1).is_err());
    }

    #[test]
    fn test_slow_path_refills_per_generation() {
        let (heap, pools) = pools(256);
        let thread = MutatorThread::new(2);

        assert!(pools.allocate(&thread, 1, 4).is_none());
        let obj = pools.allocate_slow(&thread, 1, 4).unwrap();
        assert!(heap.contains(1, obj.as_ptr() as usize));
        assert!(pools.allocate(&thread, 1, 4).is_some());
        assert!(thread.tlab(0).is_empty());

        assert_eq!(pools.refill_count(), 1);
        assert_eq!(pools.usage(thread.id()).map(|u| u.refills), Some(1));
    }

    #[test]
    fn test_large_requests_skip_refill() {
        let (_heap, pools) = pools(256);
        let thread = MutatorThread::new(2);
        assert!(pools.allocate_slow(&thread, 0, 200).is_none());
        assert_eq!(pools.refill_count(), 0);
    }

    #[test]
    fn test_refill_keeps_mostly_unused_buffer() {
        let (_heap, pools) = pools(256);
        let thread = MutatorThread::new(1);
        pools.allocate_slow(&thread, 0, 4).unwrap();
        assert!(pools.allocate_slow(&thread, 0, 100).is_none());
        assert_eq!(pools.refill_count(), 1);
    }

    #[test]
    fn test_retired_bytes_count_towards_thread() {
        let (_heap, pools) = pools(64);
        let thread = MutatorThread::new(1);
        pools.allocate_slow(&thread, 0, 30).unwrap();
        pools.allocate(&thread, 0, 33).unwrap();
        assert_eq!(thread.allocated_bytes(), 0);

        pools.allocate_slow(&thread, 0, 30).unwrap();
        assert_eq!(thread.allocated_bytes(), (63 * HEAP_WORD_SIZE) as u64);
        assert_eq!(pools.usage(thread.id()).map(|u| u.wasted_words), Some(1));

        pools.release_thread(&thread);
        assert!(pools.usage(thread.id()).is_none());
        assert_eq!(thread.allocated_bytes(), (93 * HEAP_WORD_SIZE) as u64);
    }
}
