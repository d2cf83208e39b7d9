//! Property tests for the aggregation invariants
//!
//! Random datasets and parameters; every run must respect the contribution
//! bound, non-negativity, public-partition completeness and budget
//! conservation.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use mycelix_private_aggregation::bounding::{bound_contributions, CrossPartitionBounder, ValueBounds};
use mycelix_private_aggregation::{
    count, sum_per_key, CountParams, LocalExecutor, NoiseKind, PrivacySpec, PrivateCollection,
    SumParams,
};

fn noise_kind() -> impl Strategy<Value = NoiseKind> {
    prop_oneof![Just(NoiseKind::Laplace), Just(NoiseKind::Gaussian)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Total bounded contribution never exceeds identifiers × L × MaxValue
    #[test]
    fn prop_contribution_bound(
        records in prop::collection::vec((0u16..30, 0u8..12, 0.0f64..5.0), 0..400),
        max_partitions in 1i64..4,
        max_value in 0.5f64..3.0,
        seed in any::<u64>(),
    ) {
        let identifiers: BTreeSet<u16> = records.iter().map(|(id, _, _)| *id).collect();
        let input: Vec<(u16, (u8, f64))> =
            records.into_iter().map(|(id, key, value)| (id, (key, value))).collect();

        let bounder = CrossPartitionBounder::new(max_partitions, seed);
        let (bounded, stats) =
            bound_contributions(&LocalExecutor, input, &bounder, ValueBounds::new(0.0, max_value));

        let total: f64 = bounded.iter().map(|(_, v)| v).sum();
        let cap = identifiers.len() as f64 * max_partitions as f64 * max_value;
        prop_assert!(total <= cap + 1e-9);
        prop_assert!(bounded.len() <= identifiers.len() * max_partitions as usize);
        prop_assert_eq!(stats.identifiers, identifiers.len());
    }

    /// Counts are non-negative integers and public outputs cover the declared set
    #[test]
    fn prop_public_count_complete_and_non_negative(
        records in prop::collection::vec((0u16..50, 0u8..8), 0..200),
        declared in prop::collection::btree_set(0u8..10, 1..6),
        kind in noise_kind(),
        seed in any::<u64>(),
    ) {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap().with_seed(seed));
        let visits = PrivateCollection::new(records, spec);
        let delta = if kind == NoiseKind::Laplace { 0.0 } else { 1e-5 };

        let counts = count(&visits, CountParams {
            noise_kind: Some(kind),
            epsilon: 1.0,
            delta,
            max_partitions_contributed: Some(2),
            max_value: 3,
            public_partitions: Some(declared.clone()),
            ..CountParams::default()
        }).unwrap();

        let keys: BTreeSet<u8> = counts.iter().map(|(k, _)| *k).collect();
        prop_assert_eq!(keys, declared);
        prop_assert!(counts.iter().all(|(_, c)| *c >= 0));
    }

    /// Sums are clamped at zero after noise, whatever the lower bound
    #[test]
    fn prop_sum_non_negative(
        records in prop::collection::vec((0u16..40, 0u8..5, -10.0f64..10.0), 1..200),
        min_value in -5.0f64..=0.0,
        max_value in 0.1f64..5.0,
        seed in any::<u64>(),
    ) {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap().with_seed(seed));
        let spend = PrivateCollection::new(
            records.into_iter().map(|(id, key, value)| (id, (key, value))),
            spec,
        );

        let sums = sum_per_key(&spend, SumParams {
            epsilon: 1.0,
            delta: 1e-5,
            max_partitions_contributed: Some(1),
            min_value,
            max_value,
            ..SumParams::default()
        }).unwrap();
        prop_assert!(sums.iter().all(|(_, s)| *s >= 0.0));
    }

    /// Cumulative consumption never exceeds the totals, and refused
    /// requests change nothing
    #[test]
    fn prop_budget_conservation(
        requests in prop::collection::vec((0.05f64..0.6, 0.0f64..4e-6), 1..8),
    ) {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap().with_seed(1));
        let visits = PrivateCollection::new(vec![(1u16, 0u8), (2, 0), (3, 1)], Arc::clone(&spec));

        for (epsilon, delta) in requests {
            let before = spec.remaining_budget().unwrap();
            let result = count(&visits, CountParams {
                epsilon,
                delta,
                max_partitions_contributed: Some(1),
                max_value: 1,
                ..CountParams::default()
            });
            let after = spec.remaining_budget().unwrap();
            match result {
                Ok(_) => prop_assert!(after.0 < before.0),
                Err(_) => prop_assert_eq!(after, before),
            }
            let ledger = spec.ledger_snapshot().unwrap();
            prop_assert!(ledger.consumed_epsilon() <= ledger.total_epsilon() + 1e-9);
            prop_assert!(ledger.consumed_delta() <= ledger.total_delta() + 1e-15);
        }
    }
}
