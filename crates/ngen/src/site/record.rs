//! Allocation Site Record - per-context target generations and counts
//!
//! A record starts with a single slot shared by every calling context.
//! `expand` switches it, once, to one slot per context id. The switch is a
//! copy-on-grow published through `crossbeam::epoch`: readers pin a guard,
//! and the old slots are reclaimed only after every guard that could still
//! see them is gone.
//!
//! Counts and targets are updated with relaxed atomics and are not
//! linearizable with each other. A reader may see a target one update
//! behind the latest count, and an increment racing an expansion may land
//! in the old slots and be lost.

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::logging::{log_enabled, log_event, AllocEvent, LogLevel};
use crate::util::constants::MAX_ALLOC_SITES;
use crate::util::AtomicUtils;

struct ContextSlots {
    target: Box<[AtomicU32]>,
    allocs: Box<[AtomicU64]>,
}

impl ContextSlots {
    fn new(len: usize) -> Self {
        Self {
            target: (0..len).map(|_| AtomicU32::new(0)).collect(),
            allocs: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn slot(&self, context: u16) -> usize {
        let len = self.target.len();
        if len == 1 {
            0
        } else {
            context as usize % len
        }
    }
}

/// Borrowed view of a record's slots, valid for the guard's lifetime even
/// if the record expands meanwhile.
pub struct SlotsView<'g> {
    slots: &'g ContextSlots,
}

impl<'g> SlotsView<'g> {
    #[inline]
    pub fn target_generation(&self, context: u16) -> u32 {
        self.slots.target[self.slots.slot(context)].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn allocation_count(&self, context: u16) -> u64 {
        self.slots.allocs[self.slots.slot(context)].load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.target.is_empty()
    }
}

/// AllocationSiteRecord - generation targets for one allocation site
pub struct AllocationSiteRecord {
    site: u16,
    max_generation: u32,
    expanded_len: usize,
    expanded: AtomicBool,
    slots: Atomic<ContextSlots>,
}

impl AllocationSiteRecord {
    /// Record whose targets never exceed `max_generation`. Expansion sizes
    /// it for every 16-bit context id.
    pub fn new(site: u16, max_generation: u32) -> Self {
        Self::with_capacity(site, max_generation, MAX_ALLOC_SITES)
    }

    /// Record that expands to `contexts` slots.
    pub fn with_capacity(site: u16, max_generation: u32, contexts: usize) -> Self {
        Self {
            site,
            max_generation,
            expanded_len: contexts.max(1),
            expanded: AtomicBool::new(false),
            slots: Atomic::new(ContextSlots::new(1)),
        }
    }

    pub fn site(&self) -> u16 {
        self.site
    }

    pub fn max_generation(&self) -> u32 {
        self.max_generation
    }

    #[inline]
    fn with_slots<R>(&self, f: impl FnOnce(&ContextSlots) -> R) -> R {
        let guard = epoch::pin();
        f(self.load(&guard))
    }

    #[inline]
    fn load<'g>(&self, guard: &'g Guard) -> &'g ContextSlots {
        let shared = self.slots.load(Ordering::Acquire, guard);
        // SAFETY: the pointer is never null, and storage swapped out by
        // `expand` is only destroyed after `guard` is released.
        unsafe { shared.deref() }
    }

    /// Pin the current slots for repeated reads.
    pub fn slots<'g>(&self, guard: &'g Guard) -> SlotsView<'g> {
        SlotsView {
            slots: self.load(guard),
        }
    }

    /// Count one allocation in `context`.
    #[inline]
    pub fn record_allocation(&self, context: u16) {
        self.with_slots(|slots| {
            slots.allocs[slots.slot(context)].fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Last stored target for `context`, 0 if never set.
    #[inline]
    pub fn target_generation(&self, context: u16) -> u32 {
        self.with_slots(|slots| slots.target[slots.slot(context)].load(Ordering::Relaxed))
    }

    /// Store a new target for `context`, clamped to the maximum
    /// generation. Returns the previous target.
    pub fn set_target_generation(&self, context: u16, generation: u32) -> u32 {
        let generation = generation.min(self.max_generation);
        let old = self.with_slots(|slots| {
            slots.target[slots.slot(context)].swap(generation, Ordering::Relaxed)
        });
        if old != generation {
            self.log_target_change(context, old, generation);
        }
        old
    }

    /// Raise the target for `context` by one generation, saturating at the
    /// maximum. Returns the new target.
    pub fn increment_target_generation(&self, context: u16) -> u32 {
        let old = self.with_slots(|slots| {
            AtomicUtils::bounded_increment(&slots.target[slots.slot(context)], self.max_generation)
        });
        let new = (old + 1).min(self.max_generation);
        if old != new {
            self.log_target_change(context, old, new);
        }
        new
    }

    fn log_target_change(&self, context: u16, old: u32, new: u32) {
        if log_enabled(LogLevel::Debug) {
            log_event(AllocEvent::TargetGenerationChanged {
                site: self.site,
                context,
                old,
                new,
            });
        }
    }

    #[inline]
    pub fn allocation_count(&self, context: u16) -> u64 {
        self.with_slots(|slots| slots.allocs[slots.slot(context)].load(Ordering::Relaxed))
    }

    /// Zero the allocation count of `context`.
    pub fn reset_allocations(&self, context: u16) {
        self.with_slots(|slots| slots.allocs[slots.slot(context)].store(0, Ordering::Relaxed));
    }

    /// Give every context its own slot. Every slot starts at the shared
    /// target with a zero count.
    ///
    /// Returns false if the record was already expanded.
    pub fn expand(&self) -> bool {
        if self
            .expanded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let guard = epoch::pin();
        let shared_target = self.load(&guard).target[0].load(Ordering::Relaxed);

        let grown = ContextSlots::new(self.expanded_len);
        for target in grown.target.iter() {
            target.store(shared_target, Ordering::Relaxed);
        }

        let old = self.slots.swap(Owned::new(grown), Ordering::AcqRel, &guard);
        // SAFETY: `old` is unreachable from the record now; readers that
        // loaded it before the swap hold guards that delay destruction.
        unsafe { guard.defer_destroy(old) };

        log_event(AllocEvent::ContextsExpanded {
            site: self.site,
            contexts: self.expanded_len,
        });
        true
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Acquire)
    }

    /// Number of context slots currently addressable.
    pub fn context_capacity(&self) -> usize {
        self.with_slots(|slots| slots.target.len())
    }
}

impl Drop for AllocationSiteRecord {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no guard can still reach the slots.
        unsafe {
            let guard = epoch::unprotected();
            let slots: Shared<'_, ContextSlots> = self.slots.load(Ordering::Relaxed, guard);
            if !slots.is_null() {
                drop(slots.into_owned());
            }
        }
    }
}

impl std::fmt::Debug for AllocationSiteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationSiteRecord")
            .field("site", &self.site)
            .field("max_generation", &self.max_generation)
            .field("expanded", &self.is_expanded())
            .finish()
    }
}
