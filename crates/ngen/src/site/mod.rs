//! Site Module - Generation-Target Table
//!
//! One `SiteProfile` per allocation-site index, created on first use and
//! kept until the registry is dropped. A profile pairs the per-context
//! `AllocationSiteRecord` with the site's `PromotionHistogram`.
//!
//! Creation is a compare-and-publish on a per-site slot, so the allocation
//! path never blocks on it.

pub mod promotion;
pub mod record;

pub use promotion::{PromotionHistogram, PromotionPolicy, SurvivalThresholdPolicy};
pub use record::{AllocationSiteRecord, SlotsView};

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::config::NgenConfig;
use crate::util::constants::{MAX_ALLOC_SITES, MAX_GENERATIONS, MAX_TRACKED_AGE};

/// Everything the registry knows about one allocation site.
#[derive(Debug)]
pub struct SiteProfile {
    pub record: AllocationSiteRecord,
    pub promotion: PromotionHistogram,
}

/// SiteRegistry - all allocation-site profiles of a process
pub struct SiteRegistry {
    sites: Box<[AtomicPtr<SiteProfile>]>,
    created: AtomicUsize,
    max_generation: u32,
    max_tracked_age: usize,
    contexts: usize,
}

impl SiteRegistry {
    /// Registry for a heap with `max_generations` generations.
    pub fn new(max_generations: usize, max_tracked_age: usize) -> Self {
        Self::with_context_capacity(max_generations, max_tracked_age, MAX_ALLOC_SITES)
    }

    /// Registry whose records expand to `contexts` slots.
    pub fn with_context_capacity(max_generations: usize, max_tracked_age: usize, contexts: usize) -> Self {
        let max_generations = max_generations.clamp(1, MAX_GENERATIONS);
        Self {
            sites: (0..MAX_ALLOC_SITES)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            created: AtomicUsize::new(0),
            max_generation: (max_generations - 1) as u32,
            max_tracked_age: max_tracked_age.clamp(1, MAX_TRACKED_AGE),
            contexts,
        }
    }

    pub fn from_config(config: &NgenConfig) -> Self {
        Self::new(config.max_generations, config.max_tracked_age)
    }

    /// Highest generation a target may name.
    pub fn max_generation(&self) -> u32 {
        self.max_generation
    }

    #[inline]
    pub fn get(&self, site: u16) -> Option<&SiteProfile> {
        let profile = self.sites[site as usize].load(Ordering::Acquire);
        // SAFETY: published profiles live until the registry is dropped.
        unsafe { profile.as_ref() }
    }

    /// Profile for `site`, created on first use.
    #[inline]
    pub fn get_or_create(&self, site: u16) -> &SiteProfile {
        if let Some(profile) = self.get(site) {
            return profile;
        }
        self.create(site)
    }

    #[cold]
    fn create(&self, site: u16) -> &SiteProfile {
        let fresh = Box::into_raw(Box::new(SiteProfile {
            record: AllocationSiteRecord::with_capacity(site, self.max_generation, self.contexts),
            promotion: PromotionHistogram::new(self.max_tracked_age, self.max_generation),
        }));

        match self.sites[site as usize].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                // SAFETY: published above, freed only on drop.
                unsafe { &*fresh }
            },
            Err(winner) => {
                // SAFETY: `fresh` was never published; `winner` was.
                unsafe {
                    drop(Box::from_raw(fresh));
                    &*winner
                }
            },
        }
    }

    /// Target generation of `(site, context)`, 0 if the site has no
    /// profile yet.
    #[inline]
    pub fn recommended_generation(&self, site: u16, context: u16) -> u32 {
        self.get(site)
            .map_or(0, |profile| profile.record.target_generation(context))
    }

    /// Count one allocation at `(site, context)`.
    #[inline]
    pub fn record_allocation_at(&self, site: u16, context: u16) {
        self.get_or_create(site).record.record_allocation(context);
    }

    /// Count one survival at `age` for objects allocated at `site`.
    pub fn record_survival(&self, site: u16, age: usize) {
        self.get_or_create(site).promotion.record_survival(age);
    }

    /// Recompute `(site, context)`'s target from its histogram under
    /// `policy` and store it. Returns the new target.
    pub fn apply_policy(&self, site: u16, context: u16, policy: &dyn PromotionPolicy) -> u32 {
        let profile = self.get_or_create(site);
        let target = profile.promotion.target_generation_with(policy);
        profile.record.set_target_generation(context, target);
        target
    }

    /// Visit every created profile in site order.
    pub fn for_each_site<F>(&self, mut f: F)
    where
        F: FnMut(&SiteProfile),
    {
        for slot in self.sites.iter() {
            // SAFETY: see `get`.
            if let Some(profile) = unsafe { slot.load(Ordering::Acquire).as_ref() } {
                f(profile);
            }
        }
    }

    /// Zero every promotion histogram.
    pub fn reset_promotion(&self) {
        self.for_each_site(|profile| profile.promotion.reset());
    }

    /// Number of sites with a profile.
    pub fn len(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new(MAX_GENERATIONS, MAX_TRACKED_AGE)
    }
}

impl Drop for SiteRegistry {
    fn drop(&mut self) {
        for slot in self.sites.iter_mut() {
            let profile = std::mem::replace(slot.get_mut(), ptr::null_mut());
            if !profile.is_null() {
                // SAFETY: created by `Box::into_raw`, freed once.
                drop(unsafe { Box::from_raw(profile) });
            }
        }
    }
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRegistry")
            .field("sites", &self.len())
            .field("max_generation", &self.max_generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_site_recommends_zero() {
        let registry = SiteRegistry::default();
        assert_eq!(registry.recommended_generation(12, 3), 0);
        assert!(registry.get(12).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_allocation_creates_profile() {
        let registry = SiteRegistry::default();
        registry.record_allocation_at(12, 3);
        registry.record_allocation_at(12, 3);
        let profile = registry.get(12).unwrap();
        assert_eq!(profile.record.allocation_count(3), 2);
        assert_eq!(profile.record.site(), 12);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_returns_same_profile() {
        let registry = SiteRegistry::default();
        let a = registry.get_or_create(5) as *const SiteProfile;
        let b = registry.get_or_create(5) as *const SiteProfile;
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_generation_follows_generation_count() {
        let registry = SiteRegistry::new(4, 16);
        assert_eq!(registry.max_generation(), 3);
        registry.get_or_create(1).record.set_target_generation(0, 10);
        assert_eq!(registry.recommended_generation(1, 0), 3);
    }

    #[test]
    fn test_apply_policy_stores_target() {
        let registry = SiteRegistry::default();
        for _ in 0..4 {
            registry.record_survival(9, 2);
        }
        let target = registry.apply_policy(9, 0, &SurvivalThresholdPolicy::default());
        assert_eq!(target, 2);
        assert_eq!(registry.recommended_generation(9, 0), 2);

        registry.reset_promotion();
        assert_eq!(registry.get(9).unwrap().promotion.total(), 0);
    }
}
