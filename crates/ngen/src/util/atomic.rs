//! Atomic Utilities
//!
//! Helper functions for atomic operations.

use std::sync::atomic::{AtomicU32, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Atomic increment that never exceeds `max`
    ///
    /// Returns the previous value.
    pub fn bounded_increment(atomic: &AtomicU32, max: u32) -> u32 {
        let mut current = atomic.load(Ordering::Relaxed);

        loop {
            if current >= max {
                return current;
            }

            match atomic.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}
