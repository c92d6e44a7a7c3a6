//! Mutator Thread - per-thread allocation state
//!
//! Everything here is owned by one application thread: the opaque calling
//! context, the generation of the allocation in progress, the allocated
//! byte counter, the current code location and one allocation pool per
//! generation. A `MutatorThread` can move between OS threads but is never
//! shared.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocator::tlab::Tlab;
use crate::context::{ContextResolver, Method};

/// Thread ID type
pub type ThreadId = u64;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Method and bytecode offset a thread is executing.
#[derive(Debug, Clone)]
pub struct CodeLocation {
    pub method: Arc<Method>,
    pub bci: u32,
}

/// MutatorThread - one application thread as seen by the allocator
#[derive(Debug)]
pub struct MutatorThread {
    id: ThreadId,
    context: Cell<u32>,
    alloc_gen: Cell<u32>,
    allocated_bytes: Cell<u64>,
    location: RefCell<Option<CodeLocation>>,
    tlabs: Box<[Tlab]>,
}

impl MutatorThread {
    /// Thread with one pool per generation, `generations >= 1`.
    pub fn new(generations: usize) -> Self {
        Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            context: Cell::new(0),
            alloc_gen: Cell::new(0),
            allocated_bytes: Cell::new(0),
            location: RefCell::new(None),
            tlabs: (0..generations.max(1)).map(|_| Tlab::new()).collect(),
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Opaque calling-context value.
    #[inline]
    pub fn context(&self) -> u32 {
        self.context.get()
    }

    #[inline]
    pub fn set_context(&self, context: u32) {
        self.context.set(context);
    }

    /// Generation chosen for the allocation in progress.
    #[inline]
    pub fn alloc_gen(&self) -> u32 {
        self.alloc_gen.get()
    }

    #[inline]
    pub fn set_alloc_gen(&self, generation: u32) {
        self.alloc_gen.set(generation);
    }

    /// Bytes this thread allocated outside its pools plus bytes used in
    /// pools it has retired. Never decreases.
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.get()
    }

    #[inline]
    pub fn incr_allocated_bytes(&self, bytes: u64) {
        self.allocated_bytes
            .set(self.allocated_bytes.get().saturating_add(bytes));
    }

    /// Record the location the thread is executing.
    pub fn set_location(&self, method: Arc<Method>, bci: u32) {
        *self.location.borrow_mut() = Some(CodeLocation { method, bci });
    }

    pub fn clear_location(&self) {
        *self.location.borrow_mut() = None;
    }

    pub fn location(&self) -> Option<CodeLocation> {
        self.location.borrow().clone()
    }

    pub(crate) fn with_location<R>(&self, f: impl FnOnce(&Method, u32) -> R) -> Option<R> {
        self.location
            .borrow()
            .as_ref()
            .map(|location| f(&location.method, location.bci))
    }

    /// Enter the call at `bci` in `method`. If the call site tracks
    /// context, its index is folded into the thread's context.
    ///
    /// Returns the context to restore with `leave_invoke_site`.
    pub fn enter_invoke_site(&self, resolver: &ContextResolver, method: &Method, bci: u32) -> u32 {
        let saved = self.context.get();
        if let Some(site) = resolver.resolve_invoke(method, bci) {
            if site.track_context() {
                self.context.set(saved ^ site.index() as u32);
            }
        }
        saved
    }

    pub fn leave_invoke_site(&self, saved: u32) {
        self.context.set(saved);
    }

    /// Pool for `generation`; generations past the last pool share it.
    #[inline]
    pub fn tlab(&self, generation: u32) -> &Tlab {
        let last = self.tlabs.len() - 1;
        &self.tlabs[(generation as usize).min(last)]
    }

    pub fn tlab_count(&self) -> usize {
        self.tlabs.len()
    }

    /// Give back every pool. Returns the words left unused in them.
    pub fn retire_tlabs(&self) -> usize {
        self.tlabs
            .iter()
            .map(|tlab| {
                self.incr_allocated_bytes(tlab.used_bytes() as u64);
                tlab.retire()
            })
            .sum()
    }
}
