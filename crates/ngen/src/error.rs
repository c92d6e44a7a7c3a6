//! Error Module - ngen Error Types
//!
//! Defines all error types used in ngen.
//!
//! # Error Categories
//!
//! ## Resource Errors
//! - `OutOfMemory` - Heap space exhausted or GC overhead limit exceeded.
//!   Fatal to the requesting allocation, never retried internally.
//!
//! ## Profile Errors
//! - `Profile` - Profiling allow-list could not be read or parsed.
//!   Fatal at load time; no partially-loaded profile is ever used.
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration
//! - `InvalidArgument` - Invalid function argument
//!
//! ## Heap Errors
//! - `HeapReservation` - The reference heap could not map its memory

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Which kind of out-of-memory condition an allocation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OomKind {
    /// Ordinary exhaustion of heap space.
    HeapSpace,
    /// The collector reports that too much time is spent collecting
    /// for too little reclaimed space.
    GcOverheadLimit,
}

impl OomKind {
    /// Human-readable message used when reporting this condition.
    pub fn message(&self) -> &'static str {
        match self {
            OomKind::HeapSpace => "Java heap space",
            OomKind::GcOverheadLimit => "GC overhead limit exceeded",
        }
    }
}

impl std::fmt::Display for OomKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Main error type for all ngen operations
///
/// # Examples
///
/// ```rust
/// use ngen::error::{NgenError, OomKind};
///
/// fn handle_error(err: NgenError) {
///     match err {
///         NgenError::OutOfMemory { kind: OomKind::GcOverheadLimit, .. } => {
///             eprintln!("collector is thrashing");
///         }
///         NgenError::OutOfMemory { requested_words, .. } => {
///             eprintln!("OOM: requested {} words", requested_words);
///         }
///         _ => eprintln!("Other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum NgenError {
    /// Out of memory - the global heap refused the request
    ///
    /// **When returned:** Both the thread-local pool and the global heap
    /// failed to provide `requested_words` heap words.
    ///
    /// **Recovery strategy:** None inside ngen. The caller raises the
    /// runtime's out-of-memory condition of the matching kind.
    #[error("Out of memory ({kind}): requested {requested_words} heap words")]
    OutOfMemory { kind: OomKind, requested_words: usize },

    /// Profiling allow-list failed to load
    ///
    /// **When returned:** At startup, when a restricted profiling mode was
    /// requested and the file is missing or malformed.
    ///
    /// **Recovery strategy:** Cannot recover - fix the profile file
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Configuration error
    ///
    /// **When returned:** `NgenConfig::validate` rejected a value
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid argument
    ///
    /// **When returned:** Function argument fails validation
    ///
    /// **Example scenarios:**
    /// - Pool size smaller than an object header
    /// - Zero-capacity reference heap
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reserving memory for the reference heap failed
    #[error("Heap reservation failed: {0}")]
    HeapReservation(#[source] std::io::Error),
}

impl NgenError {
    /// Check if this error is recoverable
    ///
    /// Nothing an allocation returns is retried: out-of-memory is terminal
    /// for the request and load errors are terminal for the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NgenError::InvalidArgument(_))
    }

    /// Out-of-memory sub-kind, if this is an out-of-memory error.
    pub fn oom_kind(&self) -> Option<OomKind> {
        match self {
            NgenError::OutOfMemory { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Errors raised while loading a profiling allow-list.
///
/// Line numbers are 1-based.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to open profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: unknown record type `{tag}`")]
    UnknownRecordType { line: usize, tag: String },

    #[error("line {line}: missing {field} field")]
    MalformedRecord { line: usize, field: &'static str },

    #[error("line {line}: invalid {field} `{value}`")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// Result type alias for ngen operations
pub type Result<T> = std::result::Result<T, NgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oom_kind_messages() {
        let err = NgenError::OutOfMemory {
            kind: OomKind::GcOverheadLimit,
            requested_words: 12,
        };
        assert_eq!(err.oom_kind(), Some(OomKind::GcOverheadLimit));
        assert!(err.to_string().contains("GC overhead limit exceeded"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_profile_error_converts() {
        let err: NgenError = ProfileError::UnknownRecordType {
            line: 3,
            tag: "XID".to_string(),
        }
        .into();
        assert!(matches!(err, NgenError::Profile(_)));
        assert!(err.to_string().contains("XID"));
        assert_eq!(err.oom_kind(), None);
    }
}
