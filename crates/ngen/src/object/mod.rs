//! Object Module - header layout and raw object initialization

pub mod header;

pub use header::{HeapWord, ObjectHeader, ObjectRef, ProvenanceTag, TypeId, HEADER_WORDS};

use std::ptr::NonNull;

/// Clear the type and gap fields and zero every body word of a
/// `words`-sized object.
///
/// # Safety
/// `obj` must point to `words` writable heap words with `words >=
/// HEADER_WORDS`, not yet visible to any other thread as parseable.
#[inline]
pub unsafe fn init_obj(obj: NonNull<HeapWord>, words: usize) {
    debug_assert!(words >= HEADER_WORDS, "unexpected object size");
    let header = obj.cast::<ObjectHeader>().as_ref();
    header.clear_type();
    header.clear_gap();
    std::ptr::write_bytes(obj.as_ptr().add(HEADER_WORDS), 0, words - HEADER_WORDS);
}
