//! Location hashing
//!
//! A location key is the 32-bit hash of a method's qualified
//! name-and-signature plus the bytecode offset. The method part is computed
//! once per method and cached on it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::util::constants::METHOD_HASH_SEED;

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);

    for block in blocks.by_ref() {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, &byte) in tail.iter().enumerate() {
            k1 |= (byte as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash of a textual method identifier.
#[inline]
pub fn method_name_hash(name: &str) -> u32 {
    murmur3_32(METHOD_HASH_SEED, name.as_bytes())
}

/// Key of a location named by its textual method identifier.
#[inline]
pub fn name_key(name: &str, bci: u32) -> u32 {
    method_name_hash(name).wrapping_add(bci)
}

/// An executing method as seen by the allocation subsystem.
///
/// `name` is the fully qualified name-and-signature string, the same text
/// a profile file uses in its METHOD field.
#[derive(Debug)]
pub struct Method {
    name: Arc<str>,
    /// Cached name hash; 0 means not computed yet.
    context_hash: AtomicU32,
}

impl Method {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            context_hash: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Name hash, computed on first use.
    ///
    /// Concurrent first calls may both compute it; they store the same value.
    #[inline]
    pub fn context_hash(&self) -> u32 {
        let cached = self.context_hash.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let key = method_name_hash(&self.name);
        self.context_hash.store(key, Ordering::Relaxed);
        key
    }

    /// Key of the location at `bci` in this method.
    #[inline]
    pub fn location_key(&self, bci: u32) -> u32 {
        self.context_hash().wrapping_add(bci)
    }
}
