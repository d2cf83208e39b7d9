//! Differentially private sum per partition

use std::collections::BTreeSet;
use std::hash::Hash;

use mycelix_dp_core::{validate_max_value, validate_value_bounds, NoiseKind};
use serde::{Deserialize, Serialize};

use crate::aggregation::{resolve_noise_kind, BoundedAggregation};
use crate::bounding::ValueBounds;
use crate::collection::PrivateCollection;
use crate::error::{AggregationError, Result};
use crate::pipeline::{Executor, LocalExecutor};
use crate::selection::PartitionSelectionStrategy;

const OPERATION: &str = "SumPerKey";

/// Parameters for [`sum_per_key`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumParams<K> {
    pub noise_kind: Option<NoiseKind>,
    pub epsilon: f64,
    pub delta: f64,
    pub max_partitions_contributed: Option<i64>,
    /// Clamping interval for one identifier's total in one partition
    pub min_value: f64,
    pub max_value: f64,
    #[serde(skip)]
    pub public_partitions: Option<BTreeSet<K>>,
    #[serde(default)]
    pub partition_selection: PartitionSelectionStrategy,
}

impl<K> Default for SumParams<K> {
    fn default() -> Self {
        Self {
            noise_kind: None,
            epsilon: 0.0,
            delta: 0.0,
            max_partitions_contributed: None,
            min_value: 0.0,
            max_value: 1.0,
            public_partitions: None,
            partition_selection: PartitionSelectionStrategy::default(),
        }
    }
}

fn value_bounds<K>(params: &SumParams<K>) -> Result<ValueBounds> {
    validate_max_value(params.max_value).map_err(AggregationError::invalid(OPERATION))?;
    validate_value_bounds(params.min_value, params.max_value)
        .map_err(AggregationError::invalid(OPERATION))?;
    Ok(ValueBounds::new(params.min_value, params.max_value))
}

/// Sum the values of each partition with differential privacy
///
/// Records are `(identifier, (partition, value))`. An identifier's values
/// in one partition are summed, then clamped to `[min_value, max_value]`.
/// `max_value` must be positive; a negative `min_value` lets refunds offset
/// purchases, but the noised sums are always clamped to be non-negative.
pub fn sum_per_key<Id, K>(
    collection: &PrivateCollection<Id, (K, f64)>,
    params: SumParams<K>,
) -> Result<Vec<(K, f64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
{
    sum_per_key_with(&LocalExecutor, collection, params)
}

/// [`sum_per_key`] on an explicit executor
#[tracing::instrument(skip_all, fields(operation = OPERATION, records = collection.len()))]
pub fn sum_per_key_with<Id, K, E>(
    executor: &E,
    collection: &PrivateCollection<Id, (K, f64)>,
    params: SumParams<K>,
) -> Result<Vec<(K, f64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
    E: Executor,
{
    let noise_kind = resolve_noise_kind(OPERATION, params.noise_kind);
    let bounds = value_bounds(&params)?;
    let spec = collection.spec();
    let max_partitions = spec.resolve_max_partitions(OPERATION, params.max_partitions_contributed)?;

    let plan = BoundedAggregation {
        operation: OPERATION,
        noise_kind,
        epsilon: params.epsilon,
        delta: params.delta,
        max_partitions,
        bounds,
        public_partitions: params.public_partitions,
        strategy: params.partition_selection,
    };
    plan.run(executor, spec, collection.records().to_vec())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::privacy_spec::PrivacySpec;

    fn params(min_value: f64, max_value: f64) -> SumParams<&'static str> {
        SumParams {
            noise_kind: Some(NoiseKind::Laplace),
            epsilon: 1.0,
            delta: 1e-5,
            max_partitions_contributed: Some(1),
            min_value,
            max_value,
            ..SumParams::default()
        }
    }

    #[test]
    fn test_bounds_validation() {
        assert!(value_bounds(&params(0.0, 5.0)).is_ok());
        assert!(value_bounds(&params(-5.0, 2.0)).is_ok());
        assert!(value_bounds(&params(-5.0, 0.0)).unwrap_err().is_configuration());
        assert!(value_bounds(&params(-5.0, -1.0)).unwrap_err().is_configuration());
        assert!(value_bounds(&params(0.0, 0.0)).unwrap_err().is_configuration());
        assert!(value_bounds(&params(3.0, 1.0)).unwrap_err().is_configuration());
        assert!(value_bounds(&params(0.0, f64::NAN)).is_err());
    }

    #[test]
    fn test_sum_clamps_per_identifier_totals() {
        let spec = Arc::new(PrivacySpec::new(10.0, 1e-5).unwrap().with_seed(2));
        // 300 identifiers each spend 2 + 2 = 4, clamped to 3
        let records: Vec<(u32, (&str, f64))> =
            (0..300).flat_map(|id| [(id, ("shop", 2.0)), (id, ("shop", 2.0))]).collect();
        let collection = PrivateCollection::new(records, spec);

        let sums = sum_per_key(&collection, SumParams { epsilon: 10.0, ..params(0.0, 3.0) }).unwrap();
        assert_eq!(sums.len(), 1);
        // noise scale b = 3 / 5
        assert!((sums[0].1 - 900.0).abs() < 20.0, "sum {}", sums[0].1);
    }

    #[test]
    fn test_non_positive_max_value_rejected_before_budget() {
        let spec = Arc::new(PrivacySpec::new(1.0, 0.0).unwrap().with_seed(13));
        let public: BTreeSet<&str> = ["refunds"].into_iter().collect();
        let records: Vec<(u32, (&str, f64))> = (0..50).map(|id| (id, ("refunds", -4.0))).collect();
        let collection = PrivateCollection::new(records, Arc::clone(&spec));

        let err = sum_per_key(
            &collection,
            SumParams {
                delta: 0.0,
                public_partitions: Some(public),
                ..params(-5.0, 0.0)
            },
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(spec.remaining_budget().unwrap(), (1.0, 0.0));
    }

    #[test]
    fn test_negative_totals_are_clamped_at_zero_after_noise() {
        let spec = Arc::new(PrivacySpec::new(1.0, 0.0).unwrap().with_seed(13));
        let public: BTreeSet<&str> = ["refunds", "sales"].into_iter().collect();
        let records: Vec<(u32, (&str, f64))> = (0..50).map(|id| (id, ("refunds", -4.0))).collect();
        let collection = PrivateCollection::new(records, spec);

        let sums = sum_per_key(
            &collection,
            SumParams {
                delta: 0.0,
                public_partitions: Some(public),
                ..params(-5.0, 1.0)
            },
        )
        .unwrap();
        assert_eq!(sums.len(), 2);
        // true refunds total is -200, far below any noise draw at b = 5
        assert!(sums.iter().all(|(_, s)| *s >= 0.0));
        assert_eq!(sums[0], ("refunds", 0.0));
    }
}
