//! Allocator Submodule - Bump Pointer Allocation
//!
//! Shared bump pointer over one contiguous region, in heap words.
//! Allocation is a single compare-and-swap on the top pointer.

use crate::error::{NgenError, Result};
use crate::util::constants::HEAP_WORD_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};

/// BumpPointerAllocator - lock-free bump pointer over `[start, end)`
#[derive(Debug)]
pub struct BumpPointerAllocator {
    start: usize,
    top: AtomicUsize,
    end: usize,
}

impl BumpPointerAllocator {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(NgenError::InvalidArgument(format!(
                "start ({:#x}) must be less than end ({:#x})",
                start, end
            )));
        }
        if start % HEAP_WORD_SIZE != 0 || end % HEAP_WORD_SIZE != 0 {
            return Err(NgenError::InvalidArgument(format!(
                "region [{:#x}, {:#x}) must be word aligned",
                start, end
            )));
        }

        Ok(Self {
            start,
            top: AtomicUsize::new(start),
            end,
        })
    }

    /// Carve `words` heap words, retrying on contention. `None` when the
    /// region cannot hold them.
    pub fn allocate(&self, words: usize) -> Option<usize> {
        let bytes = words.checked_mul(HEAP_WORD_SIZE)?;
        let mut current_top = self.top.load(Ordering::Relaxed);

        loop {
            let new_top = current_top.checked_add(bytes)?;
            if new_top > self.end {
                return None;
            }

            match self.top.compare_exchange_weak(
                current_top,
                new_top,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current_top),
                Err(actual) => current_top = actual,
            }
        }
    }

    /// Forget every allocation. Only safe when nothing in the region is live.
    pub fn reset(&self) {
        self.top.store(self.start, Ordering::SeqCst);
    }

    pub fn remaining_words(&self) -> usize {
        (self.end - self.top.load(Ordering::Relaxed)) / HEAP_WORD_SIZE
    }

    pub fn capacity_words(&self) -> usize {
        (self.end - self.start) / HEAP_WORD_SIZE
    }

    pub fn allocated_words(&self) -> usize {
        (self.top.load(Ordering::Relaxed) - self.start) / HEAP_WORD_SIZE
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = HEAP_WORD_SIZE;

    #[test]
    fn test_rejects_bad_regions() {
        assert!(BumpPointerAllocator::new(0x2000, 0x1000).is_err());
        assert!(BumpPointerAllocator::new(0x1001, 0x2000).is_err());
    }

    #[test]
    fn test_allocate_is_sequential() {
        let bump = BumpPointerAllocator::new(0x1000, 0x1000 + 8 * W).unwrap();
        assert_eq!(bump.allocate(2), Some(0x1000));
        assert_eq!(bump.allocate(3), Some(0x1000 + 2 * W));
        assert_eq!(bump.remaining_words(), 3);
        assert_eq!(bump.allocate(4), None);
        assert_eq!(bump.allocate(3), Some(0x1000 + 5 * W));
        assert_eq!(bump.remaining_words(), 0);
    }

    #[test]
    fn test_reset() {
        let bump = BumpPointerAllocator::new(0x1000, 0x1000 + 4 * W).unwrap();
        bump.allocate(4);
        bump.reset();
        assert_eq!(bump.allocated_words(), 0);
        assert_eq!(bump.capacity_words(), 4);
    }

    #[test]
    fn test_concurrent_allocations_do_not_overlap() {
        let bump = BumpPointerAllocator::new(0x10000, 0x10000 + 4000 * W).unwrap();
        let mut addrs: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let bump = &bump;
                    s.spawn(move || (0..1000).filter_map(|_| bump.allocate(1)).collect::<Vec<_>>())
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 4000);
        assert_eq!(bump.remaining_words(), 0);
    }
}
