//! Differentially private count per partition

use std::collections::BTreeSet;
use std::hash::Hash;

use mycelix_dp_core::{validate_max_value, NoiseKind};
use serde::{Deserialize, Serialize};

use crate::aggregation::{resolve_noise_kind, BoundedAggregation};
use crate::bounding::ValueBounds;
use crate::collection::PrivateCollection;
use crate::error::{AggregationError, Result};
use crate::pipeline::{Executor, LocalExecutor};
use crate::selection::PartitionSelectionStrategy;

const OPERATION: &str = "Count";

/// Parameters for [`count`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountParams<K> {
    /// Laplace when unset
    pub noise_kind: Option<NoiseKind>,
    /// (0, 0) takes the whole budget of the spec
    pub epsilon: f64,
    pub delta: f64,
    /// Falls back to the spec default when unset
    pub max_partitions_contributed: Option<i64>,
    /// Cap on one identifier's records in one partition
    pub max_value: i64,
    /// Declared partition universe; disables partition selection
    #[serde(skip)]
    pub public_partitions: Option<BTreeSet<K>>,
    #[serde(default)]
    pub partition_selection: PartitionSelectionStrategy,
}

impl<K> Default for CountParams<K> {
    fn default() -> Self {
        Self {
            noise_kind: None,
            epsilon: 0.0,
            delta: 0.0,
            max_partitions_contributed: None,
            max_value: 1,
            public_partitions: None,
            partition_selection: PartitionSelectionStrategy::default(),
        }
    }
}

/// Count the records of each partition with differential privacy
///
/// Each identifier contributes to at most `max_partitions_contributed`
/// partitions and counts at most `max_value` times in each. Noised counts
/// are rounded and clamped to be non-negative. Without public partitions,
/// partitions with too few identifiers are left out of the output.
///
/// ```
/// use std::sync::Arc;
/// use mycelix_private_aggregation::{count, CountParams, PrivacySpec, PrivateCollection};
///
/// let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap());
/// let visits = PrivateCollection::new(vec![("alice", "mon"), ("bob", "mon")], spec);
///
/// let params = CountParams {
///     epsilon: 1.0,
///     delta: 1e-5,
///     max_partitions_contributed: Some(1),
///     max_value: 1,
///     ..CountParams::default()
/// };
/// let counts = count(&visits, params).unwrap();
/// assert!(counts.iter().all(|(_, c)| *c >= 0));
/// ```
pub fn count<Id, K>(
    collection: &PrivateCollection<Id, K>,
    params: CountParams<K>,
) -> Result<Vec<(K, i64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
{
    count_with(&LocalExecutor, collection, params)
}

/// [`count`] on an explicit executor
#[tracing::instrument(skip_all, fields(operation = OPERATION, records = collection.len()))]
pub fn count_with<Id, K, E>(
    executor: &E,
    collection: &PrivateCollection<Id, K>,
    params: CountParams<K>,
) -> Result<Vec<(K, i64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
    E: Executor,
{
    let noise_kind = resolve_noise_kind(OPERATION, params.noise_kind);
    validate_max_value(params.max_value as f64).map_err(AggregationError::invalid(OPERATION))?;
    let spec = collection.spec();
    let max_partitions = spec.resolve_max_partitions(OPERATION, params.max_partitions_contributed)?;

    let plan = BoundedAggregation {
        operation: OPERATION,
        noise_kind,
        epsilon: params.epsilon,
        delta: params.delta,
        max_partitions,
        bounds: ValueBounds::new(0.0, params.max_value as f64),
        public_partitions: params.public_partitions,
        strategy: params.partition_selection,
    };
    let records: Vec<(Id, (K, f64))> = collection
        .records()
        .iter()
        .map(|(id, key)| (id.clone(), (key.clone(), 1.0)))
        .collect();

    let noisy = plan.run(executor, spec, records)?;
    Ok(noisy
        .into_iter()
        .map(|(key, value)| (key, value.round() as i64))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::privacy_spec::PrivacySpec;

    fn params(epsilon: f64, delta: f64) -> CountParams<&'static str> {
        CountParams {
            epsilon,
            delta,
            max_partitions_contributed: Some(1),
            max_value: 10,
            ..CountParams::default()
        }
    }

    #[test]
    fn test_invalid_max_value_leaves_budget() {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap());
        let collection = PrivateCollection::new(vec![(1u32, "a")], Arc::clone(&spec));

        for max_value in [-1, 0] {
            let err = count(&collection, CountParams { max_value, ..params(0.5, 1e-6) }).unwrap_err();
            assert!(err.is_configuration());
        }
        assert_eq!(spec.remaining_budget().unwrap(), (1.0, 1e-5));
    }

    #[test]
    fn test_missing_max_partitions_is_configuration_error() {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap());
        let collection = PrivateCollection::new(vec![(1u32, "a")], spec);
        let err = count(
            &collection,
            CountParams {
                max_partitions_contributed: None,
                ..params(1.0, 1e-5)
            },
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_spec_default_max_partitions() {
        let spec = Arc::new(
            PrivacySpec::new(1.0, 1e-5)
                .unwrap()
                .with_max_partitions_contributed(2)
                .unwrap()
                .with_seed(6),
        );
        let records: Vec<(u32, &str)> = (0..200).flat_map(|id| [(id, "a"), (id, "b")]).collect();
        let collection = PrivateCollection::new(records, spec);

        let counts = count(
            &collection,
            CountParams {
                max_partitions_contributed: None,
                max_value: 1,
                ..params(0.0, 0.0)
            },
        )
        .unwrap();
        assert_eq!(counts.len(), 2);
        for (_, c) in counts {
            assert!((100..300).contains(&c), "count {} far from 200", c);
        }
    }

    #[test]
    fn test_seeded_count_is_reproducible() {
        let run = || {
            let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap().with_seed(21));
            let records: Vec<(u32, &str)> = (0..100).map(|id| (id, if id % 2 == 0 { "x" } else { "y" })).collect();
            count(&PrivateCollection::new(records, spec), params(1.0, 1e-5)).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_params_from_json() {
        let params: CountParams<String> = serde_json::from_str(
            r#"{ "noise_kind": "Gaussian", "epsilon": 1.0, "delta": 1e-5,
                 "max_partitions_contributed": 3, "max_value": 2 }"#,
        )
        .unwrap();
        assert_eq!(params.noise_kind, Some(NoiseKind::Gaussian));
        assert_eq!(params.max_value, 2);
        assert_eq!(params.public_partitions, None);
        assert_eq!(params.partition_selection, PartitionSelectionStrategy::NoisyThreshold);
    }
}
