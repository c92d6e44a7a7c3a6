//! Context Module - Program Location Resolution
//!
//! Maps (method, bytecode offset) pairs to dense 16-bit indices, one table
//! for allocation sites and one for invocation sites.
//!
//! # Modes
//!
//! - **Open**: any location may be profiled. The first lookup of a key
//!   inserts an entry whose index is the low 16 bits of the key.
//! - **Restricted**: only locations listed in a profile file are profiled.
//!   A miss returns `None`.
//!
//! # Collisions
//!
//! Entries are matched by 32-bit key only. Two distinct locations whose
//! keys collide share one entry and one index.
//!
//! # Thread Safety
//!
//! Lookups and open-mode inserts take no locks. Concurrent first inserts of
//! the same key agree on a single entry.

pub mod hash;
pub mod profile;
pub mod table;

pub use hash::{method_name_hash, murmur3_32, name_key, Method};
pub use profile::{parse_profile, read_profile, write_profile, ProfileRecord};
pub use table::{ContextEntry, ContextTable};

use std::io::Write;
use std::path::Path;

use crate::config::ProfilingMode;
use crate::error::Result;
use crate::logging::{log_enabled, log_event, AllocEvent, LogLevel};
use crate::util::constants::{CONTEXT_TABLE_SIZE, INDEX_MASK};

/// Which table a location belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// An object-creation instruction.
    Allocation,
    /// A call instruction.
    Invocation,
}

impl ContextKind {
    /// Record tag used in profile files.
    pub fn tag(&self) -> &'static str {
        match self {
            ContextKind::Allocation => "NID",
            ContextKind::Invocation => "MID",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NID" => Some(ContextKind::Allocation),
            "MID" => Some(ContextKind::Invocation),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ContextKind::Allocation => "allocation",
            ContextKind::Invocation => "invocation",
        }
    }
}

#[derive(Debug)]
enum Resolution {
    Open { excluded_prefixes: Vec<String> },
    Restricted,
}

/// ContextResolver - resolves program locations to context entries
///
/// # Examples
///
/// ```rust
/// use ngen::context::{ContextResolver, Method};
///
/// let resolver = ContextResolver::open(vec!["java".to_string()]);
/// let method = Method::new("App.main([Ljava/lang/String;)V");
///
/// let entry = resolver.resolve_alloc(&method, 4).unwrap();
/// assert_eq!(entry.index() as u32, method.location_key(4) & 0xFFFF);
///
/// let system = Method::new("java.lang.Object.<init>()V");
/// assert!(resolver.resolve_alloc(&system, 0).is_none());
/// ```
pub struct ContextResolver {
    resolution: Resolution,
    alloc_table: ContextTable,
    invoke_table: ContextTable,
}

impl ContextResolver {
    /// Build a resolver for `mode`. Restricted mode loads its profile file
    /// here; any load failure is returned and no resolver is built.
    pub fn new(mode: ProfilingMode) -> Result<Self> {
        match mode {
            ProfilingMode::Open { excluded_prefixes } => Ok(Self::open(excluded_prefixes)),
            ProfilingMode::Restricted { path } => Self::from_profile_file(&path),
        }
    }

    /// Open-mode resolver.
    pub fn open(excluded_prefixes: Vec<String>) -> Self {
        Self {
            resolution: Resolution::Open { excluded_prefixes },
            alloc_table: ContextTable::new(CONTEXT_TABLE_SIZE),
            invoke_table: ContextTable::new(CONTEXT_TABLE_SIZE),
        }
    }

    /// Restricted-mode resolver over already parsed records.
    ///
    /// Records are inserted in order, so a later record for the same key
    /// shadows an earlier one.
    pub fn restricted<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ProfileRecord>,
    {
        let resolver = Self {
            resolution: Resolution::Restricted,
            alloc_table: ContextTable::new(CONTEXT_TABLE_SIZE),
            invoke_table: ContextTable::new(CONTEXT_TABLE_SIZE),
        };
        for record in records {
            let entry = ContextEntry::preloaded(record.key(), record.index, &record.method, record.bci);
            resolver.table(record.kind).push(entry);
        }
        resolver
    }

    /// Restricted-mode resolver loaded from a profile file.
    pub fn from_profile_file(path: &Path) -> Result<Self> {
        let records = read_profile(path)?;
        let resolver = Self::restricted(records);

        log_event(AllocEvent::ProfileLoaded {
            path: path.display().to_string(),
            alloc_sites: resolver.alloc_table.len(),
            invoke_sites: resolver.invoke_table.len(),
        });

        Ok(resolver)
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self.resolution, Resolution::Restricted)
    }

    /// The table holding locations of `kind`.
    pub fn table(&self, kind: ContextKind) -> &ContextTable {
        match kind {
            ContextKind::Allocation => &self.alloc_table,
            ContextKind::Invocation => &self.invoke_table,
        }
    }

    /// Resolve the location `bci` in `method`.
    #[inline]
    pub fn resolve(&self, kind: ContextKind, method: &Method, bci: u32) -> Option<&ContextEntry> {
        let entry = match &self.resolution {
            Resolution::Restricted => self.table(kind).get(method.location_key(bci))?,
            Resolution::Open { excluded_prefixes } => {
                if is_excluded(excluded_prefixes, method.name()) {
                    return None;
                }
                let key = method.location_key(bci);
                let (entry, inserted) = self
                    .table(kind)
                    .get_or_insert_with(key, || ContextEntry::new(key, (key & INDEX_MASK) as u16));
                if inserted && log_enabled(LogLevel::Debug) {
                    log_event(AllocEvent::SiteDiscovered {
                        kind: kind.label().to_string(),
                        key,
                        index: entry.index(),
                    });
                }
                entry
            },
        };

        entry.refresh(method, bci);
        Some(entry)
    }

    #[inline]
    pub fn resolve_alloc(&self, method: &Method, bci: u32) -> Option<&ContextEntry> {
        self.resolve(ContextKind::Allocation, method, bci)
    }

    #[inline]
    pub fn resolve_invoke(&self, method: &Method, bci: u32) -> Option<&ContextEntry> {
        self.resolve(ContextKind::Invocation, method, bci)
    }

    /// Allocation-site index, 0 when the location is not profiled.
    #[inline]
    pub fn alloc_index(&self, method: &Method, bci: u32) -> u16 {
        self.resolve_alloc(method, bci).map_or(0, ContextEntry::index)
    }

    /// Invocation-site index, 0 when the location is not profiled.
    #[inline]
    pub fn invoke_index(&self, method: &Method, bci: u32) -> u16 {
        self.resolve_invoke(method, bci).map_or(0, ContextEntry::index)
    }

    /// Turn per-call-site context tracking on or off for every invocation
    /// entry currently known.
    pub fn set_track_context(&self, track: bool) {
        self.invoke_table.for_each(|entry| entry.set_track_context(track));
    }

    /// `(key, index)` of every entry of `kind`, sorted by key.
    pub fn entries(&self, kind: ContextKind) -> Vec<(u32, u16)> {
        let mut entries = Vec::with_capacity(self.table(kind).len());
        self.table(kind)
            .for_each(|entry| entries.push((entry.key(), entry.index())));
        entries.sort_unstable();
        entries
    }

    /// Records for every entry whose method is known, allocation sites
    /// first. Shadowed duplicates are skipped.
    pub fn records(&self) -> Vec<ProfileRecord> {
        let mut records = Vec::new();
        for kind in [ContextKind::Allocation, ContextKind::Invocation] {
            let table = self.table(kind);
            let mut kind_records = Vec::new();
            table.for_each(|entry| {
                let Some(method) = entry.method_name() else {
                    return;
                };
                let visible = table
                    .get(entry.key())
                    .is_some_and(|found| std::ptr::eq(found, entry));
                if visible {
                    kind_records.push(ProfileRecord {
                        kind,
                        method: method.to_string(),
                        bci: entry.bci(),
                        index: entry.index(),
                    });
                }
            });
            kind_records.sort_by(|a, b| (&a.method, a.bci).cmp(&(&b.method, b.bci)));
            records.extend(kind_records);
        }
        records
    }

    /// Write every known entry in profile-file form, so that a later run
    /// can load it in restricted mode.
    pub fn export_profile<W: Write>(&self, writer: W) -> std::io::Result<()> {
        write_profile(writer, &self.records())
    }
}

impl std::fmt::Debug for ContextResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResolver")
            .field("restricted", &self.is_restricted())
            .field("alloc_sites", &self.alloc_table.len())
            .field("invoke_sites", &self.invoke_table.len())
            .finish()
    }
}

#[inline]
fn is_excluded(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ContextKind, method: &str, bci: u32, index: u16) -> ProfileRecord {
        ProfileRecord {
            kind,
            method: method.to_string(),
            bci,
            index,
        }
    }

    #[test]
    fn test_tags() {
        assert_eq!(ContextKind::from_tag("NID"), Some(ContextKind::Allocation));
        assert_eq!(ContextKind::from_tag("MID"), Some(ContextKind::Invocation));
        assert_eq!(ContextKind::from_tag("nid"), None);
        assert_eq!(ContextKind::Invocation.tag(), "MID");
    }

    #[test]
    fn test_open_mode_inserts_low_bits_index() {
        let resolver = ContextResolver::open(Vec::new());
        let method = Method::new("A.f()V");
        let entry = resolver.resolve_alloc(&method, 9).unwrap();
        assert_eq!(entry.index() as u32, method.location_key(9) & INDEX_MASK);
        assert_eq!(entry.bci(), 9);
        assert_eq!(entry.method_name(), Some("A.f()V"));

        let again = resolver.resolve_alloc(&method, 9).unwrap();
        assert!(std::ptr::eq(entry, again));
        assert_eq!(resolver.table(ContextKind::Allocation).len(), 1);
        assert!(resolver.table(ContextKind::Invocation).is_empty());
    }

    #[test]
    fn test_open_mode_excludes_prefixes() {
        let resolver = ContextResolver::open(vec!["java".to_string(), "sun.".to_string()]);
        assert!(resolver.resolve_alloc(&Method::new("java.util.List.of()V"), 1).is_none());
        assert!(resolver.resolve_invoke(&Method::new("sun.misc.X.y()V"), 1).is_none());
        assert_eq!(resolver.alloc_index(&Method::new("java.X.y()V"), 1), 0);
        assert!(resolver.table(ContextKind::Allocation).is_empty());
    }

    #[test]
    fn test_restricted_mode_misses() {
        let resolver = ContextResolver::restricted(vec![record(ContextKind::Allocation, "bar", 7, 0x20)]);
        assert!(resolver.is_restricted());
        assert_eq!(resolver.alloc_index(&Method::new("bar"), 7), 0x20);
        assert!(resolver.resolve_alloc(&Method::new("bar"), 8).is_none());
        assert!(resolver.resolve_invoke(&Method::new("bar"), 7).is_none());
    }

    #[test]
    fn test_restricted_duplicate_is_shadowed() {
        let resolver = ContextResolver::restricted(vec![
            record(ContextKind::Allocation, "bar", 7, 0x20),
            record(ContextKind::Allocation, "bar", 7, 0x21),
        ]);
        assert_eq!(resolver.alloc_index(&Method::new("bar"), 7), 0x21);
        let records = resolver.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 0x21);
    }

    #[test]
    fn test_set_track_context_reaches_invocation_entries() {
        let resolver = ContextResolver::open(Vec::new());
        let method = Method::new("A.g()V");
        let site = resolver.resolve_invoke(&method, 2).unwrap();
        assert!(!site.track_context());
        resolver.set_track_context(true);
        assert!(site.track_context());
    }

    #[test]
    fn test_entries_sorted_by_key() {
        let resolver = ContextResolver::open(Vec::new());
        let method = Method::new("A.h()V");
        for bci in [5, 1, 3] {
            resolver.resolve_alloc(&method, bci);
        }
        let entries = resolver.entries(ContextKind::Allocation);
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_export_round_trips_through_restricted() {
        let open = ContextResolver::open(Vec::new());
        let alloc = Method::new("A.make()V");
        let call = Method::new("A.call()V");
        let alloc_index = open.alloc_index(&alloc, 4);
        let call_index = open.invoke_index(&call, 8);

        let mut buf = Vec::new();
        open.export_profile(&mut buf).unwrap();
        let restricted = ContextResolver::restricted(parse_profile(buf.as_slice()).unwrap());

        assert_eq!(restricted.alloc_index(&alloc, 4), alloc_index);
        assert_eq!(restricted.invoke_index(&call, 8), call_index);
    }
}
