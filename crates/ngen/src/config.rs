//! Configuration Module - Allocation Profiling Parameters
//!
//! Manages all configuration parameters for ngen.
//! The profiling mode chosen here is threaded into the context resolver
//! at construction time; nothing consults a global path afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::constants::{
    DEFAULT_HEAP_SIZE, DEFAULT_TLAB_WORDS, MAX_GENERATIONS, MAX_TRACKED_AGE, MIN_TLAB_WORDS,
};

/// How the context resolver discovers program locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfilingMode {
    /// Any location may be profiled. A miss materializes a new entry.
    /// Methods whose name starts with one of `excluded_prefixes` are never
    /// profiled.
    Open { excluded_prefixes: Vec<String> },

    /// Only locations listed in the profile file are profiled.
    Restricted { path: PathBuf },
}

/// Main configuration for ngen
///
/// # Examples
///
/// ```rust
/// use ngen::NgenConfig;
///
/// let config = NgenConfig {
///     tlab_enabled: false,
///     track_provenance: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NgenConfig {
    /// Resolve allocation sites and steer allocations by recorded
    /// target generation.
    ///
    /// Default: true
    pub profiling_enabled: bool,

    /// Restrict profiling to the locations listed in this file.
    ///
    /// Default: None (open profiling)
    pub profile_file: Option<PathBuf>,

    /// Method-name prefixes never profiled in open mode.
    ///
    /// Default: `["java"]`
    pub excluded_prefixes: Vec<String>,

    /// Enable per-thread, per-generation allocation pools
    ///
    /// Default: true
    pub tlab_enabled: bool,

    /// Size of each thread-local pool in heap words
    ///
    /// Default: 32K words (256KB)
    pub tlab_words: usize,

    /// Number of generations the heap distinguishes
    ///
    /// Target generations are clamped to `max_generations - 1`.
    /// Default: 16
    pub max_generations: usize,

    /// Size of the reference arena heap in bytes
    ///
    /// Default: 64MB
    pub heap_size: usize,

    /// Encode the site/context tag into each object's mark word
    ///
    /// Has no effect unless the `provenance` feature is compiled in.
    /// Default: false
    pub track_provenance: bool,

    /// Number of age buckets kept by each promotion histogram
    ///
    /// Default: 16
    pub max_tracked_age: usize,

    /// Print allocation events to the console
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for NgenConfig {
    fn default() -> Self {
        NgenConfig {
            // Profiling
            profiling_enabled: true,
            profile_file: None,
            excluded_prefixes: vec!["java".to_string()],

            // Pools
            tlab_enabled: true,
            tlab_words: DEFAULT_TLAB_WORDS,

            // Heap
            max_generations: MAX_GENERATIONS,
            heap_size: DEFAULT_HEAP_SIZE,

            // Diagnostics
            track_provenance: false,
            max_tracked_age: MAX_TRACKED_AGE,
            verbose: false,
        }
    }
}

impl NgenConfig {
    /// Validate configuration
    ///
    /// ```rust
    /// let config = ngen::NgenConfig {
    ///     max_generations: 0,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tlab_enabled && self.tlab_words < MIN_TLAB_WORDS {
            return Err(ConfigError::InvalidTlabSize(format!(
                "tlab_words must be >= {}",
                MIN_TLAB_WORDS
            )));
        }

        if self.max_generations == 0 || self.max_generations > MAX_GENERATIONS {
            return Err(ConfigError::InvalidGenerations(format!(
                "max_generations must be between 1 and {}",
                MAX_GENERATIONS
            )));
        }

        let min_heap = self.max_generations * self.tlab_words * std::mem::size_of::<usize>();
        if self.heap_size == 0 || (self.tlab_enabled && self.heap_size < min_heap) {
            return Err(ConfigError::InvalidHeapSize(format!(
                "heap_size must hold at least one pool per generation ({} bytes)",
                min_heap
            )));
        }

        if self.max_tracked_age == 0 || self.max_tracked_age > MAX_TRACKED_AGE {
            return Err(ConfigError::InvalidTrackedAge(format!(
                "max_tracked_age must be between 1 and {}",
                MAX_TRACKED_AGE
            )));
        }

        Ok(())
    }

    /// Profiling mode implied by this configuration
    pub fn profiling_mode(&self) -> ProfilingMode {
        match &self.profile_file {
            Some(path) => ProfilingMode::Restricted { path: path.clone() },
            None => ProfilingMode::Open {
                excluded_prefixes: self.excluded_prefixes.clone(),
            },
        }
    }

    /// Parse a configuration from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - NGEN_PROFILING
    /// - NGEN_PROFILE_FILE
    /// - NGEN_USE_TLAB
    /// - NGEN_TLAB_WORDS
    /// - NGEN_HEAP_SIZE
    /// - NGEN_VERBOSE
    ///
    /// ```bash
    /// export NGEN_PROFILE_FILE=/tmp/app.prof
    /// export NGEN_USE_TLAB=0
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("NGEN_PROFILING") {
            config.profiling_enabled = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("NGEN_PROFILE_FILE") {
            if !val.is_empty() {
                config.profile_file = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("NGEN_USE_TLAB") {
            config.tlab_enabled = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("NGEN_TLAB_WORDS") {
            if let Ok(words) = val.parse::<usize>() {
                config.tlab_words = words;
            }
        }

        if let Ok(val) = std::env::var("NGEN_HEAP_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("NGEN_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TLAB size: {0}")]
    InvalidTlabSize(String),

    #[error("Invalid generation count: {0}")]
    InvalidGenerations(String),

    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid tracked age: {0}")]
    InvalidTrackedAge(String),

    #[error("Invalid configuration document: {0}")]
    Parse(String),
}
