//! # ngen - Context-Sensitive Allocation for Generational Heaps
//!
//! ngen decides, for every new object, which heap generation it should be
//! born in, based on where it is allocated and through which calls the
//! allocating code was reached.
//!
//! ## Overview
//!
//! - **Context Resolver**: maps `(method, bytecode index)` locations to
//!   16-bit site and context indices, either from a fixed profile or by
//!   discovering locations as they run
//! - **Generation-Target Table**: per-site, per-context target generation
//!   and allocation counter, expandable from one shared slot to one slot
//!   per context without stopping readers
//! - **Promotion Histogram**: per-site survival ages feeding a pluggable
//!   promotion policy
//! - **Allocation Dispatcher**: thread-local pool fast path, global heap
//!   slow path, header initialization in publication order
//! - **Global Counters**: process-wide allocation count and bytes
//!
//! ## Quick Start
//!
//! ```rust
//! use ngen::{GenerationHint, NgenConfig, TypeId};
//!
//! fn main() -> Result<(), ngen::NgenError> {
//!     let config = NgenConfig {
//!         heap_size: 8 * 1024 * 1024,
//!         max_generations: 4,
//!         tlab_words: 4096,
//!         ..Default::default()
//!     };
//!     let dispatcher = ngen::init_with_config(config)?;
//!     let thread = dispatcher.new_thread();
//!
//!     // Objects allocated at site 3 under context 1 go to generation 2.
//!     dispatcher.sites().get_or_create(3).record.set_target_generation(1, 2);
//!
//!     let ty = TypeId::new(1).unwrap();
//!     let obj = dispatcher.allocate_object(&thread, ty, GenerationHint::new(3, 1), 4)?;
//!     assert_eq!(obj.type_id(), Some(ty));
//!     assert_eq!(thread.alloc_gen(), 2);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                   Mutator Thread                       │
//! │   location (method, bci)        context word           │
//! │          │                           │                 │
//! │          ▼                           │                 │
//! │   ContextResolver ── site index ─────┤                 │
//! │                                      ▼                 │
//! │                               GenerationHint           │
//! └──────────────────────────────────────┼─────────────────┘
//!                                        ▼
//! ┌───────────────────────────────────────────────────────┐
//! │               AllocationDispatcher                     │
//! │   SiteRegistry ──► target generation                   │
//! │        │                                               │
//! │        ▼                                               │
//! │   TLAB (per generation) ──► refill ──► GlobalHeap      │
//! │        │                                               │
//! │        ▼                                               │
//! │   zero body, length, mark word, type (release)         │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `AllocationDispatcher`, `ContextResolver` and `SiteRegistry` are
//!   `Send + Sync`
//! - `MutatorThread` is owned by exactly one thread
//! - Table lookups and target-generation reads take no locks
//!
//! ## Modules
//!
//! - [`allocator`]: Dispatcher, thread-local pools, global heap
//! - [`config`]: Configuration parameters and validation
//! - [`context`]: Location hashing, context tables, profile files
//! - [`error`]: Error types
//! - [`logging`]: Structured profiling events
//! - [`object`]: Object header layout
//! - [`site`]: Per-site target generations and promotion histograms
//! - [`stats`]: Allocation counters
//! - [`thread`]: Per-mutator allocation state
//! - [`util`]: Constants and helpers

// Profiling
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod site;

// Allocation
pub mod allocator;
pub mod object;
pub mod thread;

// Monitoring
pub mod stats;

// Utilities
pub mod util;

pub use allocator::{AllocationDispatcher, ArenaHeap, GenerationHint, GlobalHeap};
pub use config::{NgenConfig, ProfilingMode};
pub use context::{ContextKind, ContextResolver, Method};
pub use error::{NgenError, OomKind, Result};
pub use object::{ObjectRef, TypeId};
pub use site::SiteRegistry;
pub use thread::MutatorThread;

use std::sync::Arc;

use crate::allocator::LoggingObserver;
use crate::logging::{configure_logger, LogLevel, LoggerConfig};

/// ngen version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize ngen with the configuration from the environment
///
/// See [`NgenConfig::from_env`] for the variables read.
pub fn init() -> Result<AllocationDispatcher> {
    init_with_config(NgenConfig::from_env())
}

/// Initialize ngen with custom configuration
///
/// Validates `config`, reserves an [`ArenaHeap`] of `heap_size` bytes
/// split into `max_generations` generations, and builds a dispatcher over
/// it. With `verbose`, allocation events are also printed to the console
/// and out-of-memory failures are logged.
///
/// # Errors
///
/// - `Configuration` - `config` is invalid
/// - `Profile` - the restricted profile could not be loaded
/// - `HeapReservation` - the heap memory could not be mapped
pub fn init_with_config(config: NgenConfig) -> Result<AllocationDispatcher> {
    config.validate()?;

    if config.verbose {
        configure_logger(LoggerConfig {
            level: LogLevel::Debug,
            console: true,
            ..Default::default()
        });
    }

    let heap = Arc::new(ArenaHeap::new(config.heap_size, config.max_generations)?);
    let dispatcher = AllocationDispatcher::new(&config, heap)?;
    Ok(if config.verbose {
        dispatcher.with_observer(Arc::new(LoggingObserver))
    } else {
        dispatcher
    })
}
