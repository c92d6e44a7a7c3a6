//! Allocation Profiling Logging
//!
//! Structured events for the profiling and allocation subsystem, useful for:
//! - Checking which profile was loaded
//! - Following how target generations evolve per site
//! - Diagnosing out-of-memory failures
//!
//! Log Levels:
//! - ERROR: Out-of-memory failures
//! - WARN: Unusual conditions
//! - INFO: Profile loading, context expansion
//! - DEBUG: Site discovery, target generation changes
//! - TRACE: Pool refills, allocations outside pools
//!
//! Nothing on the allocation fast path logs.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for allocation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Allocation event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocEvent {
    /// Profile allow-list loaded at startup
    ProfileLoaded {
        path: String,
        alloc_sites: usize,
        invoke_sites: usize,
    },

    /// A location was seen for the first time in open mode
    SiteDiscovered { kind: String, key: u32, index: u16 },

    /// A site switched from one shared slot to one slot per context
    ContextsExpanded { site: u16, contexts: usize },

    /// Target generation of one (site, context) changed
    TargetGenerationChanged {
        site: u16,
        context: u16,
        old: u32,
        new: u32,
    },

    /// A thread-local pool was replaced by a fresh one
    PoolRefilled {
        thread: u64,
        generation: u32,
        words: usize,
    },

    /// An object was allocated directly from the global heap
    OutsidePoolAllocation { generation: u32, words: usize },

    /// The global heap refused an allocation
    OutOfMemory { kind: String, requested_words: usize },
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Events kept in memory; older ones are dropped first
    pub capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            capacity: 4096,
        }
    }
}

/// ProfileLogger - centralized logging for allocation profiling
pub struct ProfileLogger {
    config: LoggerConfig,
    events: Mutex<VecDeque<(Instant, AllocEvent)>>,
    enabled: AtomicBool,
}

impl ProfileLogger {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether an event of `level` would be kept.
    pub fn accepts(&self, level: LogLevel) -> bool {
        self.is_enabled() && level <= self.config.level
    }

    /// Log an event
    pub fn log(&self, event: AllocEvent) {
        if !self.accepts(event_level(&event)) {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn output_console(&self, event: &AllocEvent) {
        let prefix = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        if self.config.json {
            println!("{}{}", prefix, to_json(event));
        } else if matches!(event, AllocEvent::OutOfMemory { .. }) {
            eprintln!("{}{}", prefix, to_human(event));
        } else {
            println!("{}{}", prefix, to_human(event));
        }
    }

    /// Get all retained events
    pub fn events(&self) -> Vec<(Instant, AllocEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for ProfileLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

/// Get log level for event
pub fn event_level(event: &AllocEvent) -> LogLevel {
    match event {
        AllocEvent::OutOfMemory { .. } => LogLevel::Error,
        AllocEvent::ProfileLoaded { .. } | AllocEvent::ContextsExpanded { .. } => LogLevel::Info,
        AllocEvent::SiteDiscovered { .. } | AllocEvent::TargetGenerationChanged { .. } => {
            LogLevel::Debug
        },
        AllocEvent::PoolRefilled { .. } | AllocEvent::OutsidePoolAllocation { .. } => {
            LogLevel::Trace
        },
    }
}

fn to_human(event: &AllocEvent) -> String {
    match event {
        AllocEvent::ProfileLoaded {
            path,
            alloc_sites,
            invoke_sites,
        } => format!(
            "[ngen] Profile {} loaded ({} allocation sites, {} invocation sites)",
            path, alloc_sites, invoke_sites
        ),
        AllocEvent::SiteDiscovered { kind, key, index } => {
            format!("[ngen] New {} site key={:#010x} index={:#06x}", kind, key, index)
        },
        AllocEvent::ContextsExpanded { site, contexts } => {
            format!("[ngen] Site {:#06x} expanded to {} contexts", site, contexts)
        },
        AllocEvent::TargetGenerationChanged {
            site,
            context,
            old,
            new,
        } => format!(
            "[ngen] Site {:#06x} context {:#06x}: target generation {} -> {}",
            site, context, old, new
        ),
        AllocEvent::PoolRefilled {
            thread,
            generation,
            words,
        } => format!(
            "[ngen] Thread {} refilled generation {} pool ({} words)",
            thread, generation, words
        ),
        AllocEvent::OutsidePoolAllocation { generation, words } => format!(
            "[ngen] {} words allocated outside pools in generation {}",
            words, generation
        ),
        AllocEvent::OutOfMemory {
            kind,
            requested_words,
        } => format!(
            "[ngen] Out of memory ({}): {} words requested",
            kind, requested_words
        ),
    }
}

fn to_json(event: &AllocEvent) -> String {
    let json = match event {
        AllocEvent::ProfileLoaded {
            path,
            alloc_sites,
            invoke_sites,
        } => serde_json::json!({
            "type": "profile_loaded",
            "path": path,
            "alloc_sites": alloc_sites,
            "invoke_sites": invoke_sites
        }),
        AllocEvent::SiteDiscovered { kind, key, index } => serde_json::json!({
            "type": "site_discovered",
            "kind": kind,
            "key": key,
            "index": index
        }),
        AllocEvent::ContextsExpanded { site, contexts } => serde_json::json!({
            "type": "contexts_expanded",
            "site": site,
            "contexts": contexts
        }),
        AllocEvent::TargetGenerationChanged {
            site,
            context,
            old,
            new,
        } => serde_json::json!({
            "type": "target_generation_changed",
            "site": site,
            "context": context,
            "old": old,
            "new": new
        }),
        AllocEvent::PoolRefilled {
            thread,
            generation,
            words,
        } => serde_json::json!({
            "type": "pool_refilled",
            "thread": thread,
            "generation": generation,
            "words": words
        }),
        AllocEvent::OutsidePoolAllocation { generation, words } => serde_json::json!({
            "type": "outside_pool_allocation",
            "generation": generation,
            "words": words
        }),
        AllocEvent::OutOfMemory {
            kind,
            requested_words,
        } => serde_json::json!({
            "type": "out_of_memory",
            "kind": kind,
            "requested_words": requested_words
        }),
    };
    json.to_string()
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: RwLock<ProfileLogger> = RwLock::new(ProfileLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: AllocEvent) {
    GLOBAL_LOGGER.read().log(event);
}

/// Whether the global logger keeps events of `level`.
pub fn log_enabled(level: LogLevel) -> bool {
    GLOBAL_LOGGER.read().accepts(level)
}

/// Replace the global logger
pub fn configure_logger(config: LoggerConfig) {
    *GLOBAL_LOGGER.write() = ProfileLogger::new(config);
}

/// Global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.read().event_count()
}

/// Snapshot of the global logger's retained events
pub fn global_events() -> Vec<AllocEvent> {
    GLOBAL_LOGGER
        .read()
        .events()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}
