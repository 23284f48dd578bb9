//! Property-based tests for classification and change point aggregation.
//!
//! ## Test Categories
//!
//! ### 1. Classification
//! - Swapping the two means flips the direction and keeps the bucket
//! - Exact multiples of 10% land in the higher bucket
//!
//! ### 2. Change point sets
//! - Adding detections with one key yields one entry holding every test
//! - A test detected twice at one key is rejected and leaves the set unchanged
//! - Copies are independent of the original
//!
//! ### 3. Filtering
//! - A series is retained only if every stage accepts it

use perfshift::changepoint::{ChangeCategory, ChangePoint, ChangePointSet, ChangePointType, Direction};
use perfshift::error::PerfShiftError;
use perfshift::filter::{FilterPipeline, MinMean, MinVersions, SeriesFilter};
use perfshift::series::{ExecutionSeries, SeriesBuilder, SeriesSet};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn flat_series(test: &str, revisions: usize, value: f64) -> Arc<ExecutionSeries> {
    let builder = (0..revisions).fold(SeriesBuilder::new("p", test), |b, i| {
        b.revision(&format!("r{i}"), &[value])
    });
    Arc::new(builder.build())
}

fn change_type(regression: bool, bucket: u8) -> ChangePointType {
    let direction = if regression {
        Direction::Regression
    } else {
        Direction::Improvement
    };
    ChangePointType::new(direction, ChangeCategory::new(bucket).unwrap())
}

// ============================================================================
// Classification
// ============================================================================

proptest! {
    #[test]
    fn test_classification_symmetry(a in 0.001f64..1e6, b in 0.001f64..1e6) {
        prop_assume!(a != b);
        let forward = ChangePointType::from_means(a, b);
        let backward = ChangePointType::from_means(b, a);

        prop_assert_eq!(forward.direction, backward.direction.flipped());
        prop_assert_eq!(forward.category, backward.category);
    }

    #[test]
    fn test_bucket_matches_floor(change in 0.0f64..2.0) {
        // exact multiples of 0.1 are covered by test_exact_boundaries_go_up
        prop_assume!((0..=10).all(|k| (change - f64::from(k) / 10.0).abs() > 1e-12));

        let bucket = ChangeCategory::from_relative_change(change).bucket();
        let expected = (change.min(0.999) * 10.0).floor() as u8;
        prop_assert_eq!(bucket, expected);
    }

    #[test]
    fn test_exact_boundaries_go_up(k in 1u8..10) {
        let bucket = ChangeCategory::from_relative_change(f64::from(k) / 10.0).bucket();
        prop_assert_eq!(bucket, k);
    }

    #[test]
    fn test_regression_iff_value_grows(a in 0.001f64..1e6, b in 0.001f64..1e6) {
        let t = ChangePointType::from_means(a, b);
        prop_assert_eq!(t.is_regression(), a < b);
    }
}

// ============================================================================
// Change point sets
// ============================================================================

proptest! {
    #[test]
    fn test_same_key_merges_into_one_entry(
        tests in prop::collection::hash_set("[a-z]{1,8}", 1..12),
        regression in any::<bool>(),
        bucket in 0u8..10,
    ) {
        let set = ChangePointSet::new();
        let t = change_type(regression, bucket);
        for test in &tests {
            set.add(ChangePoint::reconstruct("r1", t, flat_series(test, 2, 1.0))).unwrap();
        }

        prop_assert_eq!(set.len(), 1);
        let stored: HashSet<String> = set.all()[0].test_names().iter().cloned().collect();
        prop_assert_eq!(stored, tests);
    }

    #[test]
    fn test_distinct_keys_stay_distinct(
        keys in prop::collection::vec((0usize..5, any::<bool>(), 0u8..10), 1..30),
    ) {
        let set = ChangePointSet::new();
        let mut expected = HashSet::new();
        for (i, (revision, regression, bucket)) in keys.iter().enumerate() {
            let revision = format!("r{revision}");
            let t = change_type(*regression, *bucket);
            set.add(ChangePoint::reconstruct(revision.clone(), t, flat_series(&format!("t{i}"), 2, 1.0)))
                .unwrap();
            expected.insert((revision, t));
        }
        prop_assert_eq!(set.len(), expected.len());
        prop_assert_eq!(set.all().len(), set.len());
    }

    #[test]
    fn test_collision_is_rejected(test in "[a-z]{1,8}", bucket in 0u8..10) {
        let set = ChangePointSet::new();
        let t = change_type(true, bucket);
        set.add(ChangePoint::reconstruct("r1", t, flat_series(&test, 2, 1.0))).unwrap();

        let err = set
            .add(ChangePoint::reconstruct("r1", t, flat_series(&test, 2, 1.0)))
            .unwrap_err();
        let is_collision = matches!(err, PerfShiftError::TestCollision { .. });
        prop_assert!(is_collision);
        prop_assert_eq!(set.len(), 1);
        prop_assert_eq!(set.all()[0].test_count(), 1);
    }

    #[test]
    fn test_copy_is_independent(count in 1usize..10, extra in "[A-Z]{1,4}") {
        let set = ChangePointSet::new();
        for i in 0..count {
            set.add(ChangePoint::reconstruct(
                format!("r{i}"),
                change_type(false, 0),
                flat_series("base", 2, 1.0),
            ))
            .unwrap();
        }

        let copy = set.copy();
        prop_assert_eq!(copy.len(), set.len());

        copy.add(ChangePoint::reconstruct("r0", change_type(false, 0), flat_series(&extra, 2, 1.0)))
            .unwrap();
        copy.add(ChangePoint::reconstruct("new", change_type(true, 9), flat_series(&extra, 2, 1.0)))
            .unwrap();

        prop_assert_eq!(set.len(), count);
        prop_assert_eq!(set.all()[0].test_count(), 1);
        prop_assert_eq!(copy.len(), count + 1);
    }
}

// ============================================================================
// Filtering
// ============================================================================

proptest! {
    #[test]
    fn test_retained_iff_every_stage_accepts(
        specs in prop::collection::vec((1usize..6, 0.0f64..20.0), 1..10),
        min_versions in 1usize..6,
        min_mean in 0.0f64..20.0,
    ) {
        let mut set = SeriesSet::new();
        for (i, (revisions, value)) in specs.iter().enumerate() {
            set.insert(flat_series(&format!("t{i}"), *revisions, *value)).unwrap();
        }

        let versions = MinVersions::new(min_versions);
        let mean = MinMean::new(min_mean);
        let kept = FilterPipeline::new()
            .add(versions.clone())
            .add(mean.clone())
            .apply(&set)
            .unwrap();

        for series in set.iter() {
            let expected = versions.accepts(series) && mean.accepts(series);
            prop_assert_eq!(kept.contains(series.test()), expected);
        }
    }
}
