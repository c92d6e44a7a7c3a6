//! Generation-target table and promotion histogram tests

use crossbeam::epoch;
use ngen::site::{
    AllocationSiteRecord, PromotionHistogram, PromotionPolicy, SiteRegistry, SurvivalThresholdPolicy,
};

#[test]
fn test_fresh_sites_target_default_generation() {
    let registry = SiteRegistry::new(4, 8);
    assert!(registry.is_empty());
    assert_eq!(registry.recommended_generation(42, 0), 0);
    assert!(registry.get(42).is_none());

    registry.record_allocation_at(42, 0);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(42).unwrap().record.site(), 42);
}

#[test]
fn test_shared_slot_before_expansion() {
    let record = AllocationSiteRecord::with_capacity(1, 3, 16);
    assert_eq!(record.context_capacity(), 1);

    record.set_target_generation(5, 2);
    record.record_allocation(5);
    record.record_allocation(9);

    // Every context reads the one shared slot.
    assert_eq!(record.target_generation(0), 2);
    assert_eq!(record.target_generation(11), 2);
    assert_eq!(record.allocation_count(3), 2);
}

#[test]
fn test_expansion_inherits_target_and_clears_counts() {
    let record = AllocationSiteRecord::with_capacity(1, 3, 16);
    record.set_target_generation(0, 2);
    record.record_allocation(0);

    assert!(record.expand());
    assert!(record.is_expanded());
    assert!(!record.expand());
    assert_eq!(record.context_capacity(), 16);

    for context in 0..16 {
        assert_eq!(record.target_generation(context), 2);
        assert_eq!(record.allocation_count(context), 0);
    }

    record.set_target_generation(3, 1);
    record.record_allocation(3);
    assert_eq!(record.target_generation(3), 1);
    assert_eq!(record.target_generation(4), 2);
    assert_eq!(record.allocation_count(3), 1);
    assert_eq!(record.allocation_count(4), 0);

    // Contexts past the capacity wrap around.
    assert_eq!(record.target_generation(3 + 16), 1);
}

#[test]
fn test_view_survives_expansion() {
    let record = AllocationSiteRecord::with_capacity(7, 3, 8);
    record.set_target_generation(0, 3);

    let guard = epoch::pin();
    let view = record.slots(&guard);
    assert_eq!(view.len(), 1);

    assert!(record.expand());
    record.set_target_generation(1, 0);

    // The pinned view still reads the pre-expansion storage.
    assert_eq!(view.len(), 1);
    assert_eq!(view.target_generation(1), 3);
    drop(guard);

    assert_eq!(record.target_generation(1), 0);
}

#[test]
fn test_targets_are_clamped() {
    let record = AllocationSiteRecord::with_capacity(1, 2, 4);
    assert_eq!(record.set_target_generation(0, 15), 0);
    assert_eq!(record.target_generation(0), 2);

    assert_eq!(record.increment_target_generation(0), 2);
    record.set_target_generation(0, 0);
    assert_eq!(record.increment_target_generation(0), 1);
    assert_eq!(record.increment_target_generation(0), 2);
    assert_eq!(record.increment_target_generation(0), 2);
}

#[test]
fn test_registry_clamps_to_heap_generations() {
    let registry = SiteRegistry::new(2, 4);
    assert_eq!(registry.max_generation(), 1);
    registry.get_or_create(9).record.set_target_generation(0, 7);
    assert_eq!(registry.recommended_generation(9, 0), 1);
}

#[test]
fn test_survival_histogram_buckets() {
    let histogram = PromotionHistogram::new(4, 3);
    for age in [0, 1, 1, 2, 9] {
        histogram.record_survival(age);
    }
    assert_eq!(histogram.counts(), vec![1, 2, 1, 1]);
    assert_eq!(histogram.total(), 5);
    assert_eq!(histogram.count(10), 0);

    histogram.reset();
    assert_eq!(histogram.total(), 0);
    assert_eq!(histogram.target_generation(), 0);
}

#[test]
fn test_threshold_policy() {
    let policy = SurvivalThresholdPolicy::default();
    assert_eq!(policy.target_generation(&[], 3), 0);
    assert_eq!(policy.target_generation(&[0, 0, 0], 3), 0);
    // Half of 10 survivals have happened by age 2.
    assert_eq!(policy.target_generation(&[2, 2, 1, 5], 3), 2);
    assert_eq!(policy.target_generation(&[0, 0, 0, 0, 8], 3), 3);

    let strict = SurvivalThresholdPolicy { threshold: 1.0 };
    assert_eq!(strict.target_generation(&[5, 0, 1], 3), 2);
}

struct Oldest;

impl PromotionPolicy for Oldest {
    fn target_generation(&self, _survivals: &[u64], max_generation: u32) -> u32 {
        max_generation + 10
    }
}

#[test]
fn test_apply_policy_stores_target() {
    let registry = SiteRegistry::new(4, 4);
    for age in [2, 2, 2, 3] {
        registry.record_survival(11, age);
    }

    let target = registry.apply_policy(11, 0, &SurvivalThresholdPolicy::default());
    assert_eq!(target, 2);
    assert_eq!(registry.recommended_generation(11, 0), 2);

    // Out-of-range policy results are clamped.
    assert_eq!(registry.apply_policy(11, 0, &Oldest), 3);
    assert_eq!(registry.recommended_generation(11, 0), 3);

    registry.reset_promotion();
    assert_eq!(registry.get(11).unwrap().promotion.total(), 0);
    assert_eq!(registry.recommended_generation(11, 0), 3);
}

#[test]
fn test_for_each_site_visits_in_order() {
    let registry = SiteRegistry::new(4, 4);
    for site in [300u16, 2, 65535] {
        registry.get_or_create(site);
    }
    let mut seen = Vec::new();
    registry.for_each_site(|profile| seen.push(profile.record.site()));
    assert_eq!(seen, vec![2, 300, 65535]);
}
