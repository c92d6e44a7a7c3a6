//! Promotion Histogram - survival counts by object age
//!
//! One histogram per allocation site. The collector's promotion accounting
//! calls `record_survival` for every tracked object that survives a
//! collection; policy code turns the distribution into a target generation
//! and stores it in the site's `AllocationSiteRecord`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Turns a survival distribution into a target generation.
pub trait PromotionPolicy: Send + Sync {
    /// `survivals[age]` is the number of survivals recorded at `age`.
    /// The result must not exceed `max_generation`.
    fn target_generation(&self, survivals: &[u64], max_generation: u32) -> u32;
}

/// Pick the first age by which `threshold` of all recorded survivals have
/// happened.
#[derive(Debug, Clone, Copy)]
pub struct SurvivalThresholdPolicy {
    pub threshold: f64,
}

impl Default for SurvivalThresholdPolicy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl PromotionPolicy for SurvivalThresholdPolicy {
    fn target_generation(&self, survivals: &[u64], max_generation: u32) -> u32 {
        let total: u64 = survivals.iter().sum();
        if total == 0 {
            return 0;
        }

        let needed = (total as f64 * self.threshold.clamp(0.0, 1.0)).ceil() as u64;
        let mut cumulative = 0u64;
        for (age, &count) in survivals.iter().enumerate() {
            cumulative += count;
            if cumulative >= needed.max(1) {
                return (age as u32).min(max_generation);
            }
        }
        max_generation
    }
}

/// PromotionHistogram - age-indexed survival counters
#[derive(Debug)]
pub struct PromotionHistogram {
    counts: Box<[AtomicU64]>,
    max_generation: u32,
}

impl PromotionHistogram {
    /// Histogram tracking ages `0..max_age`.
    ///
    /// # Panics
    ///
    /// Panics if `max_age` is zero.
    pub fn new(max_age: usize, max_generation: u32) -> Self {
        assert!(max_age > 0, "histogram must track at least one age");
        Self {
            counts: (0..max_age).map(|_| AtomicU64::new(0)).collect(),
            max_generation,
        }
    }

    /// Count one survival at `age`. Ages past the last bucket land in it.
    #[inline]
    pub fn record_survival(&self, age: usize) {
        let bucket = age.min(self.counts.len() - 1);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, age: usize) -> u64 {
        self.counts
            .get(age)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    pub fn max_age(&self) -> usize {
        self.counts.len()
    }

    /// Snapshot of every bucket.
    pub fn counts(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|count| count.load(Ordering::Relaxed)).sum()
    }

    /// Target generation under the default policy.
    pub fn target_generation(&self) -> u32 {
        self.target_generation_with(&SurvivalThresholdPolicy::default())
    }

    pub fn target_generation_with(&self, policy: &dyn PromotionPolicy) -> u32 {
        policy
            .target_generation(&self.counts(), self.max_generation)
            .min(self.max_generation)
    }

    /// Zero every bucket. Called at collection-cycle boundaries.
    pub fn reset(&self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
    }
}
