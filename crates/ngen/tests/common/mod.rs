//! Test utilities shared by the ngen integration tests
//!
//! - `DispatcherFixture`: dispatcher over a small arena heap
//! - `FailingHeap`: global heap that refuses every request
//! - `RecordingObserver`: observer that records every notification in order

#![allow(dead_code)]

use ngen::allocator::{AllocationObserver, ArenaHeap, GlobalHeap};
use ngen::object::{HeapWord, ObjectRef, TypeId};
use ngen::{AllocationDispatcher, NgenConfig, OomKind};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Heap size for tests (4MB)
pub const TEST_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Generations of the test heap
pub const TEST_GENERATIONS: usize = 4;

/// Pool size for tests
pub const TEST_TLAB_WORDS: usize = 1024;

pub fn test_config() -> NgenConfig {
    NgenConfig {
        heap_size: TEST_HEAP_SIZE,
        max_generations: TEST_GENERATIONS,
        tlab_words: TEST_TLAB_WORDS,
        ..Default::default()
    }
}

pub fn test_type() -> TypeId {
    TypeId::new(0x51).unwrap()
}

/// ============================================================================
/// DISPATCHER FIXTURE
/// ============================================================================

pub struct DispatcherFixture {
    pub heap: Arc<ArenaHeap>,
    pub observer: Arc<RecordingObserver>,
    pub dispatcher: AllocationDispatcher,
}

impl DispatcherFixture {
    pub fn with_defaults() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: NgenConfig) -> Self {
        let heap = Arc::new(
            ArenaHeap::new(config.heap_size, config.max_generations)
                .expect("arena heap should map with a valid config"),
        );
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = AllocationDispatcher::new(&config, heap.clone())
            .expect("dispatcher should build with a valid config")
            .with_observer(observer.clone());

        Self {
            heap,
            observer,
            dispatcher,
        }
    }

    /// Fixture whose pools are disabled.
    pub fn without_pools() -> Self {
        Self::with_config(NgenConfig {
            tlab_enabled: false,
            ..test_config()
        })
    }
}

/// ============================================================================
/// FAILING HEAP
/// ============================================================================

/// Global heap that fails every allocation with `kind`.
#[derive(Debug)]
pub struct FailingHeap {
    pub kind: OomKind,
    pub generations: usize,
}

impl FailingHeap {
    pub fn new(kind: OomKind) -> Self {
        Self {
            kind,
            generations: TEST_GENERATIONS,
        }
    }
}

impl GlobalHeap for FailingHeap {
    fn allocate_global(
        &self,
        _words: usize,
        _generation: u32,
        _directed: bool,
    ) -> Result<NonNull<HeapWord>, OomKind> {
        Err(self.kind)
    }

    fn allocate_pool_chunk(&self, _words: usize, _generation: u32) -> Option<NonNull<HeapWord>> {
        None
    }

    fn generations(&self) -> usize {
        self.generations
    }
}

/// ============================================================================
/// RECORDING OBSERVER
/// ============================================================================

/// What an object looked like right before its type was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreInstall {
    pub addr: usize,
    pub length: u32,
    pub mark: u64,
    pub parseable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    BeforeIdentityInstall(PreInstall),
    LowMemoryCheck,
    Allocated { addr: usize, words: usize },
    OutsidePool { generation: u32, words: usize },
    OutOfMemory { kind: OomKind, words: usize },
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }

    pub fn pre_installs(&self) -> Vec<PreInstall> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::BeforeIdentityInstall(pre) => Some(*pre),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.notifications.lock().iter().filter(|n| pred(n)).count()
    }

    fn push(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

impl AllocationObserver for RecordingObserver {
    fn detect_low_memory(&self) {
        self.push(Notification::LowMemoryCheck);
    }

    fn object_allocated(&self, obj: ObjectRef, words: usize) {
        self.push(Notification::Allocated {
            addr: obj.addr(),
            words,
        });
    }

    fn allocation_outside_pool(&self, _type_id: TypeId, generation: u32, words: usize) {
        self.push(Notification::OutsidePool { generation, words });
    }

    fn out_of_memory(&self, kind: OomKind, words: usize) {
        self.push(Notification::OutOfMemory { kind, words });
    }

    fn before_identity_install(&self, obj: ObjectRef) {
        let header = obj.header();
        self.push(Notification::BeforeIdentityInstall(PreInstall {
            addr: obj.addr(),
            length: header.length(),
            mark: header.mark(),
            parseable: header.is_parseable(),
        }));
    }
}
