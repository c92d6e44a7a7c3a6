//! Global Heap - the slow-path memory primitive
//!
//! `GlobalHeap` is what the dispatcher falls back to when a thread-local
//! pool cannot serve a request, and where pools get their memory from.
//! `ArenaHeap` is a reference implementation over one anonymous mapping
//! split into a bump region per generation.

use memmap2::MmapMut;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::allocator::bump::BumpPointerAllocator;
use crate::error::{NgenError, OomKind, Result};
use crate::object::HeapWord;
use crate::util::constants::HEAP_WORD_SIZE;

/// Global heap primitive.
pub trait GlobalHeap: Send + Sync {
    /// Allocate `words` heap words for an object headed to `generation`.
    /// `directed` is false when no generation was chosen for the object.
    ///
    /// May block, for instance to run a collection.
    fn allocate_global(
        &self,
        words: usize,
        generation: u32,
        directed: bool,
    ) -> std::result::Result<NonNull<HeapWord>, OomKind>;

    /// Memory for a thread-local pool of `generation`. `None` when the
    /// heap cannot spare it.
    fn allocate_pool_chunk(&self, words: usize, generation: u32) -> Option<NonNull<HeapWord>>;

    /// Number of generations this heap distinguishes.
    fn generations(&self) -> usize;

    /// Whether a collection is in progress.
    fn is_gc_active(&self) -> bool {
        false
    }
}

/// ArenaHeap - mapped memory split into one bump region per generation
pub struct ArenaHeap {
    regions: Vec<BumpPointerAllocator>,
    gc_active: AtomicBool,
    overhead_limit_exceeded: AtomicBool,
    // Keeps the regions' memory mapped.
    _map: MmapMut,
}

impl ArenaHeap {
    /// Reserve `size` bytes, rounded up to whole pages, and split them
    /// evenly over `generations` regions.
    pub fn new(size: usize, generations: usize) -> Result<Self> {
        if size == 0 || generations == 0 {
            return Err(NgenError::InvalidArgument(format!(
                "heap needs a non-zero size and generation count (size={}, generations={})",
                size, generations
            )));
        }

        let page = page_size::get();
        let size = size.div_ceil(page) * page;
        let region_bytes = size / generations / HEAP_WORD_SIZE * HEAP_WORD_SIZE;
        if region_bytes == 0 {
            return Err(NgenError::InvalidArgument(format!(
                "{} bytes cannot hold {} generations",
                size, generations
            )));
        }

        let mut map = MmapMut::map_anon(size).map_err(NgenError::HeapReservation)?;
        let base = map.as_mut_ptr() as usize;

        let regions = (0..generations)
            .map(|gen| {
                let start = base + gen * region_bytes;
                BumpPointerAllocator::new(start, start + region_bytes)
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "arena heap reserved {} bytes at {:#x} ({} generations)",
            size,
            base,
            generations
        );

        Ok(Self {
            regions,
            gc_active: AtomicBool::new(false),
            overhead_limit_exceeded: AtomicBool::new(false),
            _map: map,
        })
    }

    #[inline]
    fn region(&self, generation: u32) -> &BumpPointerAllocator {
        let last = self.regions.len() - 1;
        &self.regions[(generation as usize).min(last)]
    }

    /// Mark a collection as running or finished.
    pub fn set_gc_active(&self, active: bool) {
        self.gc_active.store(active, Ordering::SeqCst);
    }

    /// Make failed allocations report the GC-overhead-limit kind.
    pub fn set_gc_overhead_limit_exceeded(&self, exceeded: bool) {
        self.overhead_limit_exceeded.store(exceeded, Ordering::SeqCst);
    }

    pub fn used_words(&self, generation: u32) -> usize {
        self.region(generation).allocated_words()
    }

    pub fn capacity_words(&self, generation: u32) -> usize {
        self.region(generation).capacity_words()
    }

    /// Whether `addr` lies in `generation`'s region.
    pub fn contains(&self, generation: u32, addr: usize) -> bool {
        self.region(generation).contains(addr)
    }

    /// Generation whose region holds `addr`.
    pub fn generation_of(&self, addr: usize) -> Option<u32> {
        self.regions
            .iter()
            .position(|region| region.contains(addr))
            .map(|gen| gen as u32)
    }

    /// Drop every object of `generation`.
    ///
    /// # Safety
    /// No object or pool in the region may be used afterwards.
    pub unsafe fn reset_generation(&self, generation: u32) {
        self.region(generation).reset();
    }
}

impl GlobalHeap for ArenaHeap {
    fn allocate_global(
        &self,
        words: usize,
        generation: u32,
        directed: bool,
    ) -> std::result::Result<NonNull<HeapWord>, OomKind> {
        let generation = if directed { generation } else { 0 };
        self.region(generation)
            .allocate(words)
            .and_then(|addr| NonNull::new(addr as *mut HeapWord))
            .ok_or_else(|| {
                if self.overhead_limit_exceeded.load(Ordering::SeqCst) {
                    OomKind::GcOverheadLimit
                } else {
                    OomKind::HeapSpace
                }
            })
    }

    fn allocate_pool_chunk(&self, words: usize, generation: u32) -> Option<NonNull<HeapWord>> {
        self.region(generation)
            .allocate(words)
            .and_then(|addr| NonNull::new(addr as *mut HeapWord))
    }

    fn generations(&self) -> usize {
        self.regions.len()
    }

    fn is_gc_active(&self) -> bool {
        self.gc_active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ArenaHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaHeap")
            .field("generations", &self.regions.len())
            .field("gc_active", &self.is_gc_active())
            .finish()
    }
}
