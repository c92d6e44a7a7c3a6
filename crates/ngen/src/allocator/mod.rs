//! Allocator Module - Allocation Dispatch
//!
//! `AllocationDispatcher` is the entry point of every object creation.
//!
//! ## Allocation Flow
//!
//! 1. Resolve the hint: `(site, context)` to the recorded target
//!    generation, counting the allocation on the way, or take an
//!    explicit generation as given
//! 2. Try the calling thread's pool for that generation (fast path)
//! 3. Pool exhausted: refill it and retry
//! 4. Otherwise ask the global heap, which may block or fail
//! 5. Zero the body, set the array length if any
//! 6. Write the mark word, then publish the type
//! 7. Notify observers
//!
//! Steps 1-3 take no locks.

pub mod bump;
pub mod heap;
pub mod observer;
pub mod tlab;

pub use bump::BumpPointerAllocator;
pub use heap::{ArenaHeap, GlobalHeap};
pub use observer::{AllocationObserver, LoggingObserver, NoopObserver};
pub use tlab::{PoolUsage, ThreadLocalPools, Tlab, TlabPools};

use std::ptr::NonNull;
use std::sync::Arc;

use crate::config::NgenConfig;
use crate::context::ContextResolver;
use crate::error::{NgenError, Result};
use crate::object::{self, HeapWord, ObjectHeader, ObjectRef, ProvenanceTag, TypeId, HEADER_WORDS};
use crate::site::SiteRegistry;
use crate::stats::{self, DispatcherCounters, DispatcherStats};
use crate::thread::MutatorThread;
use crate::util::constants::{HEAP_WORD_SIZE, INDEX_MASK};

/// Generation number. 0 is the default generation.
pub type Generation = u32;

/// Where one request should land.
///
/// `Site` is the profiled form: the site's recorded target for the context
/// decides, and the allocation is counted. `Exact` names the generation
/// directly and is honored whether or not profiling is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GenerationHint {
    #[default]
    Unprofiled,
    Site(ProvenanceTag),
    Exact(Generation),
}

impl GenerationHint {
    pub const NONE: GenerationHint = GenerationHint::Unprofiled;

    #[inline]
    pub fn new(site: u16, context: u16) -> Self {
        Self::Site(ProvenanceTag::new(site, context))
    }

    #[inline]
    pub fn generation(generation: Generation) -> Self {
        Self::Exact(generation)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::Unprofiled)
    }

    #[inline]
    pub fn tag(&self) -> Option<ProvenanceTag> {
        match self {
            Self::Site(tag) => Some(*tag),
            _ => None,
        }
    }

    #[inline]
    pub fn site(&self) -> Option<u16> {
        self.tag().map(|tag| tag.site())
    }

    #[inline]
    pub fn context(&self) -> Option<u16> {
        self.tag().map(|tag| tag.context())
    }
}

/// Shape-specific header setup.
#[derive(Debug, Clone, Copy)]
enum Shape {
    Object,
    Array { length: u32, zero: bool },
}

/// AllocationDispatcher - places new objects in their target generation
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ngen::allocator::{AllocationDispatcher, ArenaHeap, GenerationHint};
/// use ngen::object::TypeId;
/// use ngen::NgenConfig;
///
/// let config = NgenConfig {
///     heap_size: 4 * 1024 * 1024,
///     tlab_words: 1024,
///     max_generations: 2,
///     ..Default::default()
/// };
/// let heap = Arc::new(ArenaHeap::new(config.heap_size, config.max_generations).unwrap());
/// let dispatcher = AllocationDispatcher::new(&config, heap.clone()).unwrap();
/// let thread = dispatcher.new_thread();
///
/// let ty = TypeId::new(1).unwrap();
/// let array = dispatcher
///     .allocate_array(&thread, ty, GenerationHint::NONE, 2 + 10, 10)
///     .unwrap();
/// assert_eq!(array.length(), 10);
///
/// let old = dispatcher
///     .allocate_object(&thread, ty, GenerationHint::generation(1), 4)
///     .unwrap();
/// assert_eq!(heap.generation_of(old.addr()), Some(1));
/// ```
pub struct AllocationDispatcher {
    resolver: Option<Arc<ContextResolver>>,
    sites: Arc<SiteRegistry>,
    heap: Arc<dyn GlobalHeap>,
    pools: Option<Arc<dyn ThreadLocalPools>>,
    observer: Arc<dyn AllocationObserver>,
    profiling: bool,
    track_provenance: bool,
    max_generation: Generation,
    counters: DispatcherCounters,
}

impl AllocationDispatcher {
    /// Dispatcher over `heap` built from `config`: a resolver for the
    /// configured profiling mode, a fresh site registry, and pools when
    /// enabled.
    pub fn new(config: &NgenConfig, heap: Arc<dyn GlobalHeap>) -> Result<Self> {
        config.validate()?;

        let resolver = if config.profiling_enabled {
            Some(Arc::new(ContextResolver::new(config.profiling_mode())?))
        } else {
            None
        };

        let pools: Option<Arc<dyn ThreadLocalPools>> = if config.tlab_enabled {
            Some(Arc::new(TlabPools::new(heap.clone(), config.tlab_words)?))
        } else {
            None
        };

        let max_generation = (heap.generations().clamp(1, config.max_generations) - 1) as Generation;

        Ok(Self {
            resolver,
            sites: Arc::new(SiteRegistry::from_config(config)),
            heap,
            pools,
            observer: Arc::new(NoopObserver),
            profiling: config.profiling_enabled,
            track_provenance: config.track_provenance,
            max_generation,
            counters: DispatcherCounters::default(),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<ContextResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_sites(mut self, sites: Arc<SiteRegistry>) -> Self {
        self.sites = sites;
        self
    }

    /// Replace the pools; `None` sends every request to the global heap.
    pub fn with_pools(mut self, pools: Option<Arc<dyn ThreadLocalPools>>) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AllocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn resolver(&self) -> Option<&Arc<ContextResolver>> {
        self.resolver.as_ref()
    }

    pub fn sites(&self) -> &Arc<SiteRegistry> {
        &self.sites
    }

    pub fn heap(&self) -> &Arc<dyn GlobalHeap> {
        &self.heap
    }

    pub fn max_generation(&self) -> Generation {
        self.max_generation
    }

    /// A mutator thread with one pool per heap generation.
    pub fn new_thread(&self) -> MutatorThread {
        MutatorThread::new(self.heap.generations())
    }

    /// Hint for an allocation at `thread`'s current location. Site index 0
    /// is the unprofiled site.
    pub fn hint_for(&self, thread: &MutatorThread) -> GenerationHint {
        let Some(resolver) = self.resolver.as_deref() else {
            return GenerationHint::NONE;
        };
        thread
            .with_location(|method, bci| resolver.resolve_alloc(method, bci).map(|entry| entry.index()))
            .flatten()
            .filter(|&site| site != 0)
            .map_or(GenerationHint::NONE, |site| {
                GenerationHint::new(site, (thread.context() & INDEX_MASK) as u16)
            })
    }

    /// Target generation of `(site, context)`.
    #[inline]
    pub fn recommended_generation(&self, site: u16, context: u16) -> Generation {
        self.sites
            .recommended_generation(site, context)
            .min(self.max_generation)
    }

    /// Count one allocation at `(site, context)`.
    #[inline]
    pub fn record_allocation_at(&self, site: u16, context: u16) {
        self.sites.record_allocation_at(site, context);
    }

    /// Allocate a `words`-sized plain object with a zeroed body.
    pub fn allocate_object(
        &self,
        thread: &MutatorThread,
        type_id: TypeId,
        hint: GenerationHint,
        words: usize,
    ) -> Result<ObjectRef> {
        self.allocate(thread, type_id, hint, words, Shape::Object)
    }

    /// Allocate a `words`-sized array of `length` elements with a zeroed
    /// body.
    pub fn allocate_array(
        &self,
        thread: &MutatorThread,
        type_id: TypeId,
        hint: GenerationHint,
        words: usize,
        length: u32,
    ) -> Result<ObjectRef> {
        self.allocate(thread, type_id, hint, words, Shape::Array { length, zero: true })
    }

    /// Like `allocate_array`, leaving the body unwritten for callers that
    /// overwrite it right away.
    pub fn allocate_array_nozero(
        &self,
        thread: &MutatorThread,
        type_id: TypeId,
        hint: GenerationHint,
        words: usize,
        length: u32,
    ) -> Result<ObjectRef> {
        self.allocate(thread, type_id, hint, words, Shape::Array { length, zero: false })
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    fn allocate(
        &self,
        thread: &MutatorThread,
        type_id: TypeId,
        hint: GenerationHint,
        words: usize,
        shape: Shape,
    ) -> Result<ObjectRef> {
        debug_assert!(!self.heap.is_gc_active(), "allocation during a collection");
        if words < HEADER_WORDS {
            return Err(NgenError::InvalidArgument(format!(
                "object of {} words is smaller than its header",
                words
            )));
        }

        let generation = self.resolve_generation(thread, hint);
        let raw = self.mem_allocate(thread, type_id, words, generation)?;

        // SAFETY: `raw` is `words >= HEADER_WORDS` fresh heap words owned by
        // this call; nothing else can see the object before its type is set.
        let obj = unsafe {
            match shape {
                Shape::Object | Shape::Array { zero: true, .. } => object::init_obj(raw, words),
                Shape::Array { zero: false, .. } => {
                    let header = raw.cast::<ObjectHeader>().as_ref();
                    header.clear_type();
                    header.clear_gap();
                },
            }
            ObjectRef::from_raw(raw)
        };

        if let Shape::Array { length, .. } = shape {
            obj.header().set_length(length);
        }
        self.install_identity(obj, type_id, hint);

        self.observer.detect_low_memory();
        self.observer.object_allocated(obj, words);
        Ok(obj)
    }

    /// Generation for this request; also stored as the thread's current
    /// allocation generation.
    #[inline]
    fn resolve_generation(&self, thread: &MutatorThread, hint: GenerationHint) -> Generation {
        let generation = match hint {
            GenerationHint::Site(tag) if self.profiling => {
                let record = &self.sites.get_or_create(tag.site()).record;
                record.record_allocation(tag.context());
                record.target_generation(tag.context()).min(self.max_generation)
            },
            GenerationHint::Exact(generation) => generation.min(self.max_generation),
            _ => 0,
        };
        thread.set_alloc_gen(generation);
        generation
    }

    fn mem_allocate(
        &self,
        thread: &MutatorThread,
        type_id: TypeId,
        words: usize,
        generation: Generation,
    ) -> Result<NonNull<HeapWord>> {
        stats::record_object_allocation((words * HEAP_WORD_SIZE) as u64);
        let directed = generation != 0;
        if directed {
            DispatcherCounters::bump(&self.counters.directed_allocations);
        }

        if let Some(pools) = self.pools.as_deref() {
            if let Some(raw) = pools.allocate(thread, generation, words) {
                DispatcherCounters::bump(&self.counters.pool_allocations);
                return Ok(raw);
            }
            if let Some(raw) = pools.allocate_slow(thread, generation, words) {
                DispatcherCounters::bump(&self.counters.pool_refills);
                return Ok(raw);
            }
        }

        match self.heap.allocate_global(words, generation, directed) {
            Ok(raw) => {
                DispatcherCounters::bump(&self.counters.global_allocations);
                thread.incr_allocated_bytes((words * HEAP_WORD_SIZE) as u64);
                self.observer.allocation_outside_pool(type_id, generation, words);
                Ok(raw)
            },
            Err(kind) => {
                DispatcherCounters::bump(&self.counters.out_of_memory);
                self.observer.out_of_memory(kind, words);
                Err(NgenError::OutOfMemory {
                    kind,
                    requested_words: words,
                })
            },
        }
    }

    /// Write the mark word and publish the type, in that order.
    #[inline]
    fn install_identity(&self, obj: ObjectRef, type_id: TypeId, hint: GenerationHint) {
        let header = obj.header();
        header.set_mark(self.prototype_mark(hint));
        self.observer.before_identity_install(obj);
        header.install_type(type_id);
    }

    #[cfg(feature = "provenance")]
    #[inline]
    fn prototype_mark(&self, hint: GenerationHint) -> u64 {
        match hint.tag() {
            Some(tag) if self.track_provenance => ObjectHeader::tagged_prototype(tag),
            _ => object::header::MARK_PROTOTYPE,
        }
    }

    #[cfg(not(feature = "provenance"))]
    #[inline]
    fn prototype_mark(&self, _hint: GenerationHint) -> u64 {
        object::header::MARK_PROTOTYPE
    }
}

impl std::fmt::Debug for AllocationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationDispatcher")
            .field("profiling", &self.profiling)
            .field("pools", &self.pools.is_some())
            .field("track_provenance", &self.track_provenance)
            .field("max_generation", &self.max_generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Method;

    fn config() -> NgenConfig {
        NgenConfig {
            heap_size: 4 * 1024 * 1024,
            tlab_words: 1024,
            max_generations: 4,
            ..Default::default()
        }
    }

    fn dispatcher(config: &NgenConfig) -> (Arc<ArenaHeap>, AllocationDispatcher) {
        let heap = Arc::new(ArenaHeap::new(config.heap_size, config.max_generations).unwrap());
        let dispatcher = AllocationDispatcher::new(config, heap.clone()).unwrap();
        (heap, dispatcher)
    }

    fn ty() -> TypeId {
        TypeId::new(9).unwrap()
    }

    #[test]
    fn test_hint_packing() {
        let hint = GenerationHint::new(0x12, 0x34);
        assert_eq!(hint.tag().map(|tag| tag.raw()), Some(0x0012_0034));
        assert_eq!(hint.site(), Some(0x12));
        assert_eq!(hint.context(), Some(0x34));
        assert!(GenerationHint::NONE.is_none());
        assert!(GenerationHint::generation(2).tag().is_none());
        assert!(!GenerationHint::generation(0).is_none());
    }

    #[test]
    fn test_plain_object_is_zeroed_and_typed() {
        let (_heap, dispatcher) = dispatcher(&config());
        let thread = dispatcher.new_thread();
        let obj = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::NONE, HEADER_WORDS + 3)
            .unwrap();
        assert_eq!(obj.type_id(), Some(ty()));
        assert_eq!(obj.length(), 0);
        for i in HEADER_WORDS..HEADER_WORDS + 3 {
            assert_eq!(unsafe { obj.word(i) }, 0);
        }
        assert_eq!(dispatcher.stats().pool_refills, 1);
    }

    #[test]
    fn test_hint_steers_generation() {
        let (heap, dispatcher) = dispatcher(&config());
        let thread = dispatcher.new_thread();
        dispatcher
            .sites()
            .get_or_create(7)
            .record
            .set_target_generation(3, 2);

        let obj = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::new(7, 3), 4)
            .unwrap();
        assert_eq!(thread.alloc_gen(), 2);
        assert_eq!(heap.generation_of(obj.addr()), Some(2));
        assert_eq!(dispatcher.sites().get(7).unwrap().record.allocation_count(3), 1);
        assert_eq!(dispatcher.stats().directed_allocations, 1);
    }

    #[test]
    fn test_profiling_disabled_ignores_hint() {
        let config = NgenConfig {
            profiling_enabled: false,
            ..config()
        };
        let (heap, dispatcher) = dispatcher(&config);
        assert!(dispatcher.resolver().is_none());
        dispatcher.sites().get_or_create(7).record.set_target_generation(0, 3);

        let thread = dispatcher.new_thread();
        let obj = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::new(7, 0), 4)
            .unwrap();
        assert_eq!(heap.generation_of(obj.addr()), Some(0));
        assert_eq!(dispatcher.sites().get(7).unwrap().record.allocation_count(0), 0);
    }

    #[test]
    fn test_explicit_generation_without_profiling() {
        let config = NgenConfig {
            profiling_enabled: false,
            ..config()
        };
        let (heap, dispatcher) = dispatcher(&config);
        let thread = dispatcher.new_thread();

        let obj = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::generation(2), 4)
            .unwrap();
        assert_eq!(heap.generation_of(obj.addr()), Some(2));
        assert_eq!(thread.alloc_gen(), 2);
        assert!(dispatcher.sites().is_empty());

        let clamped = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::generation(40), 4)
            .unwrap();
        assert_eq!(heap.generation_of(clamped.addr()), Some(3));
    }

    #[test]
    fn test_hint_for_current_location() {
        let (_heap, dispatcher) = dispatcher(&config());
        let thread = dispatcher.new_thread();
        assert!(dispatcher.hint_for(&thread).is_none());

        let method = Arc::new(Method::new("App.run()V"));
        thread.set_location(method.clone(), 12);
        thread.set_context(0x1_0005);
        let hint = dispatcher.hint_for(&thread);
        let site = dispatcher.resolver().unwrap().alloc_index(&method, 12);
        assert_eq!(hint.site(), Some(site));
        assert_eq!(hint.context(), Some(5));
    }

    #[test]
    fn test_undersized_request_is_rejected() {
        let (_heap, dispatcher) = dispatcher(&config());
        let thread = dispatcher.new_thread();
        let err = dispatcher
            .allocate_object(&thread, ty(), GenerationHint::NONE, HEADER_WORDS - 1)
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_nozero_array_sets_length() {
        let (_heap, dispatcher) = dispatcher(&config());
        let thread = dispatcher.new_thread();
        let array = dispatcher
            .allocate_array_nozero(&thread, ty(), GenerationHint::NONE, HEADER_WORDS + 4, 4)
            .unwrap();
        assert_eq!(array.length(), 4);
        assert_eq!(array.type_id(), Some(ty()));
    }

    #[test]
    fn test_recommended_generation_is_clamped_to_heap() {
        let config = NgenConfig {
            max_generations: 16,
            ..config()
        };
        let heap = Arc::new(ArenaHeap::new(config.heap_size, 2).unwrap());
        let dispatcher = AllocationDispatcher::new(&config, heap).unwrap();
        dispatcher.sites().get_or_create(1).record.set_target_generation(0, 9);
        assert_eq!(dispatcher.recommended_generation(1, 0), 1);
        assert_eq!(dispatcher.recommended_generation(2, 0), 0);
        dispatcher.record_allocation_at(2, 0);
        assert_eq!(dispatcher.sites().get(2).unwrap().record.allocation_count(0), 1);
    }
}
