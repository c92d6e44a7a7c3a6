//! Allocation notifications
//!
//! Hooks the dispatcher calls around every allocation. All of them default
//! to doing nothing.

use crate::error::OomKind;
use crate::logging::{log_enabled, log_event, AllocEvent, LogLevel};
use crate::object::{ObjectRef, TypeId};

pub trait AllocationObserver: Send + Sync {
    /// Called after every successful allocation, before `object_allocated`.
    fn detect_low_memory(&self) {}

    /// `obj` is fully formed and its type is installed.
    fn object_allocated(&self, _obj: ObjectRef, _words: usize) {}

    /// An object of `type_id` came from the global heap instead of a pool.
    fn allocation_outside_pool(&self, _type_id: TypeId, _generation: u32, _words: usize) {}

    /// The global heap refused a request. The dispatcher returns an error
    /// right after this call.
    fn out_of_memory(&self, _kind: OomKind, _words: usize) {}

    /// Body, mark word and any array length are written, the type is not
    /// installed yet.
    fn before_identity_install(&self, _obj: ObjectRef) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AllocationObserver for NoopObserver {}

/// Observer that forwards slow-path allocations and failures to the
/// global logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl AllocationObserver for LoggingObserver {
    fn allocation_outside_pool(&self, _type_id: TypeId, generation: u32, words: usize) {
        if log_enabled(LogLevel::Trace) {
            log_event(AllocEvent::OutsidePoolAllocation { generation, words });
        }
    }

    fn out_of_memory(&self, kind: OomKind, words: usize) {
        log::error!("out of memory ({}): {} words requested", kind, words);
        log_event(AllocEvent::OutOfMemory {
            kind: kind.message().to_string(),
            requested_words: words,
        });
    }
}
