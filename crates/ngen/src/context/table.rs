//! Context Table - fixed-capacity chained hash table of context entries
//!
//! Buckets are singly linked lists published through an atomic head
//! pointer. Entries are only ever prepended and are never removed before
//! the table itself is dropped, so a reference handed out by a lookup stays
//! valid for the table's lifetime.
//!
//! Entries are identified by their full 32-bit key alone. Two locations
//! whose keys collide share one entry.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::context::hash::Method;

/// One profiled program location.
#[derive(Debug)]
pub struct ContextEntry {
    /// Dense index, assigned once.
    index: u16,
    key: u32,
    /// Method name and bci of the first location resolved to this entry.
    location: OnceLock<(Arc<str>, u32)>,
    /// Identity hash of the method that last resolved to this entry.
    method_hash: AtomicU32,
    track_context: AtomicBool,
}

impl ContextEntry {
    pub fn new(key: u32, index: u16) -> Self {
        Self {
            index,
            key,
            location: OnceLock::new(),
            method_hash: AtomicU32::new(0),
            track_context: AtomicBool::new(false),
        }
    }

    /// Entry pre-populated from a profile record.
    pub(crate) fn preloaded(key: u32, index: u16, method: &str, bci: u32) -> Self {
        let entry = Self::new(key, index);
        let _ = entry.location.set((Arc::from(method), bci));
        entry
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn method_name(&self) -> Option<&str> {
        self.location.get().map(|(name, _)| &**name)
    }

    /// Identity hash of the method last resolved here, 0 before the first hit.
    pub fn method_hash(&self) -> u32 {
        self.method_hash.load(Ordering::Relaxed)
    }

    /// Bci paired with `method_name`, 0 before the first hit.
    pub fn bci(&self) -> u32 {
        self.location.get().map_or(0, |&(_, bci)| bci)
    }

    #[inline]
    pub fn track_context(&self) -> bool {
        self.track_context.load(Ordering::Relaxed)
    }

    pub fn set_track_context(&self, track: bool) {
        self.track_context.store(track, Ordering::Relaxed);
    }

    /// Record the location that just resolved to this entry.
    #[inline]
    pub(crate) fn refresh(&self, method: &Method, bci: u32) {
        if self.location.get().is_none() {
            let _ = self.location.set((method.shared_name(), bci));
        }
        self.method_hash.store(method.context_hash(), Ordering::Relaxed);
    }
}

struct Node {
    entry: ContextEntry,
    next: *const Node,
}

/// ContextTable - hash-keyed collection of context entries
pub struct ContextTable {
    buckets: Box<[AtomicPtr<Node>]>,
    len: AtomicUsize,
}

impl ContextTable {
    /// Create a table with a fixed number of buckets.
    pub fn new(buckets: usize) -> Self {
        assert!(buckets > 0, "context table needs at least one bucket");
        Self {
            buckets: (0..buckets).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn bucket(&self, key: u32) -> &AtomicPtr<Node> {
        &self.buckets[key as usize % self.buckets.len()]
    }

    /// Walk a chain looking for `key`.
    #[inline]
    fn find(&self, mut node: *const Node, key: u32) -> Option<&ContextEntry> {
        while !node.is_null() {
            // SAFETY: nodes are published with Release ordering, read here
            // after an Acquire load of a head pointer, and live until drop.
            let current = unsafe { &*node };
            if current.entry.key == key {
                return Some(&current.entry);
            }
            node = current.next;
        }
        None
    }

    /// Look up the entry for `key`.
    #[inline]
    pub fn get(&self, key: u32) -> Option<&ContextEntry> {
        self.find(self.bucket(key).load(Ordering::Acquire), key)
    }

    /// Return the entry for `key`, inserting the one built by `make` if
    /// there is none. The flag is true when this call inserted.
    ///
    /// Threads racing to insert the same key agree on a single entry.
    pub fn get_or_insert_with<F>(&self, key: u32, make: F) -> (&ContextEntry, bool)
    where
        F: FnOnce() -> ContextEntry,
    {
        let bucket = self.bucket(key);
        let mut head = bucket.load(Ordering::Acquire);
        if let Some(entry) = self.find(head, key) {
            return (entry, false);
        }

        let node = Box::into_raw(Box::new(Node {
            entry: make(),
            next: head,
        }));

        loop {
            match bucket.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: just published, never freed before drop.
                    return (unsafe { &(*node).entry }, true);
                },
                Err(actual) => {
                    if actual != head {
                        if let Some(entry) = self.find(actual, key) {
                            // SAFETY: `node` was never published.
                            drop(unsafe { Box::from_raw(node) });
                            return (entry, false);
                        }
                    }
                    head = actual;
                    // SAFETY: `node` is still private to this thread.
                    unsafe { (*node).next = head };
                },
            }
        }
    }

    /// Prepend `entry` unconditionally. A later entry with the same key
    /// shadows earlier ones.
    pub fn push(&self, entry: ContextEntry) -> &ContextEntry {
        let bucket = self.bucket(entry.key);
        let node = Box::into_raw(Box::new(Node {
            entry,
            next: ptr::null(),
        }));
        let mut head = bucket.load(Ordering::Acquire);

        loop {
            // SAFETY: `node` is private until the exchange succeeds.
            unsafe { (*node).next = head };
            match bucket.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        // SAFETY: published above, never freed before drop.
        unsafe { &(*node).entry }
    }

    /// Number of entries, including shadowed duplicates.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Visit every entry, bucket by bucket, newest first within a bucket.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ContextEntry),
    {
        for bucket in self.buckets.iter() {
            let mut node: *const Node = bucket.load(Ordering::Acquire);
            while !node.is_null() {
                // SAFETY: see `find`.
                let current = unsafe { &*node };
                f(&current.entry);
                node = current.next;
            }
        }
    }
}

impl Drop for ContextTable {
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let mut node = std::mem::replace(bucket.get_mut(), ptr::null_mut());
            while !node.is_null() {
                // SAFETY: `&mut self` rules out concurrent readers; every node
                // was created by `Box::into_raw` and is freed exactly once.
                let boxed = unsafe { Box::from_raw(node) };
                node = boxed.next as *mut Node;
            }
        }
    }
}
