//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout ngen.

pub mod atomic;

pub use atomic::AtomicUtils;

/// Constants for ngen
pub mod constants {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
    /// 1 Megabyte
    pub const MB: usize = 1024 * 1024;

    /// Bytes per heap word
    pub const HEAP_WORD_SIZE: usize = std::mem::size_of::<usize>();

    /// Number of distinct allocation-site and context indices (16 bits)
    pub const MAX_ALLOC_SITES: usize = 1 << 16;
    /// Mask selecting a 16-bit site or context index
    pub const INDEX_MASK: u32 = 0xFFFF;

    /// Bucket count of each context table
    pub const CONTEXT_TABLE_SIZE: usize = MAX_ALLOC_SITES;

    /// Upper bound on generations a heap may distinguish
    pub const MAX_GENERATIONS: usize = 16;
    /// Age buckets per promotion histogram
    pub const MAX_TRACKED_AGE: usize = 16;

    /// Default thread-local pool size: 32K words
    pub const DEFAULT_TLAB_WORDS: usize = 32 * KB;
    /// Minimum thread-local pool size: 64 words
    pub const MIN_TLAB_WORDS: usize = 64;

    /// Default reference heap size: 64MB
    pub const DEFAULT_HEAP_SIZE: usize = 64 * MB;

    /// Seed of the method-name hash
    pub const METHOD_HASH_SEED: u32 = 37;
}
