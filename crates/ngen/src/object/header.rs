//! Object Header - the two words in front of every allocated object
//!
//! Header Layout (16 bytes on 64-bit):
//! ┌─────────────────────────────────────────┐
//! │         Mark Word (8 bytes)             │  <- AtomicU64
//! │  - Bits 0-1: Lock state (01 unlocked)   │
//! │  - Bits 3-6: Age                        │
//! │  - Bits 32-63: Provenance tag           │
//! ├─────────────────────────────────────────┤
//! │         Type Id (4 bytes)               │  <- AtomicU32, 0 = not installed
//! ├─────────────────────────────────────────┤
//! │    Array Length / Gap (4 bytes)         │  <- AtomicU32
//! └─────────────────────────────────────────┘
//!
//! A non-zero type id marks the object as parseable. It is stored with
//! Release ordering after every other header field and the body are
//! written, and read with Acquire ordering.

use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::util::constants::HEAP_WORD_SIZE;

/// Minimum addressable heap unit.
pub type HeapWord = usize;

/// Header size in heap words
pub const HEADER_WORDS: usize = std::mem::size_of::<ObjectHeader>() / HEAP_WORD_SIZE;

/// Mark word of a freshly allocated, unlocked object
pub const MARK_PROTOTYPE: u64 = 0b01;

pub const LOCK_MASK: u64 = 0b11;
pub const AGE_SHIFT: u32 = 3;
pub const AGE_MASK: u64 = 0b1111 << AGE_SHIFT;
pub const PROVENANCE_SHIFT: u32 = 32;
pub const PROVENANCE_MASK: u64 = (u32::MAX as u64) << PROVENANCE_SHIFT;

/// Identity of an object's type. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(NonZeroU32);

impl TypeId {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(TypeId)
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

/// Allocation site and calling context an object was allocated from,
/// packed as `site << 16 | context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvenanceTag(u32);

impl ProvenanceTag {
    #[inline]
    pub fn new(site: u16, context: u16) -> Self {
        Self(((site as u32) << 16) | context as u32)
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn site(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub fn context(&self) -> u16 {
        self.0 as u16
    }
}

/// Object Header
#[repr(C)]
pub struct ObjectHeader {
    mark: AtomicU64,
    type_id: AtomicU32,
    /// Array length for arrays, zero gap otherwise
    length: AtomicU32,
}

impl ObjectHeader {
    #[inline]
    pub fn mark(&self) -> u64 {
        self.mark.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_mark(&self, mark: u64) {
        self.mark.store(mark, Ordering::Relaxed);
    }

    /// Object age (0-15)
    #[inline]
    pub fn age(&self) -> u8 {
        ((self.mark() & AGE_MASK) >> AGE_SHIFT) as u8
    }

    /// Prototype mark word carrying `tag`.
    #[cfg(feature = "provenance")]
    #[inline]
    pub fn tagged_prototype(tag: ProvenanceTag) -> u64 {
        MARK_PROTOTYPE | ((tag.raw() as u64) << PROVENANCE_SHIFT)
    }

    /// Provenance tag stored in the mark word, if any.
    #[cfg(feature = "provenance")]
    #[inline]
    pub fn provenance(&self) -> Option<ProvenanceTag> {
        let raw = ((self.mark() & PROVENANCE_MASK) >> PROVENANCE_SHIFT) as u32;
        (raw != 0).then_some(ProvenanceTag::from_raw(raw))
    }

    /// Installed type, `None` while the object is not yet parseable.
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        TypeId::new(self.type_id.load(Ordering::Acquire))
    }

    /// Publish the object's type. Everything written before this call is
    /// visible to any thread that observes the type.
    #[inline]
    pub fn install_type(&self, type_id: TypeId) {
        self.type_id.store(type_id.get(), Ordering::Release);
    }

    /// Drop any type left behind by a previous occupant of this memory.
    /// Must precede every other header or body write of a new object.
    #[inline]
    pub fn clear_type(&self) {
        self.type_id.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_parseable(&self) -> bool {
        self.type_id().is_some()
    }

    #[inline]
    pub fn length(&self) -> u32 {
        self.length.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_length(&self, length: u32) {
        self.length.store(length, Ordering::Relaxed);
    }

    /// Zero the gap that plain objects keep where arrays keep a length.
    #[inline]
    pub fn clear_gap(&self) {
        self.length.store(0, Ordering::Relaxed);
    }
}

/// Handle to an allocated object.
///
/// A handle does not keep the memory alive; it is valid as long as the heap
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonNull<ObjectHeader>);

impl ObjectRef {
    /// # Safety
    /// `ptr` must point to at least `HEADER_WORDS` writable, word-aligned
    /// heap words that outlive every use of the handle.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<HeapWord>) -> Self {
        Self(ptr.cast())
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<HeapWord> {
        self.0.cast()
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        // SAFETY: guaranteed by `from_raw`.
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        self.header().type_id()
    }

    #[inline]
    pub fn length(&self) -> u32 {
        self.header().length()
    }

    #[cfg(feature = "provenance")]
    #[inline]
    pub fn provenance(&self) -> Option<ProvenanceTag> {
        self.header().provenance()
    }

    /// Read the heap word at `index`, counted from the object start.
    ///
    /// # Safety
    /// `index` must lie within the object.
    #[inline]
    pub unsafe fn word(&self, index: usize) -> HeapWord {
        self.as_ptr().as_ptr().add(index).read()
    }

    /// Write the heap word at `index`, counted from the object start.
    ///
    /// # Safety
    /// `index` must lie within the object body, past the header.
    #[inline]
    pub unsafe fn set_word(&self, index: usize, value: HeapWord) {
        debug_assert!(index >= HEADER_WORDS, "header words are not plain data");
        self.as_ptr().as_ptr().add(index).write(value);
    }
}
