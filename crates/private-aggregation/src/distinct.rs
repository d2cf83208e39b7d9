//! Distinct-identifier counts and stand-alone partition selection

use std::collections::BTreeSet;
use std::hash::Hash;

use mycelix_dp_core::{validate_delta_strict, validate_epsilon, NoiseKind};
use serde::{Deserialize, Serialize};

use crate::aggregation::{resolve_noise_kind, BoundedAggregation};
use crate::bounding::{bound_contributions, CrossPartitionBounder, ValueBounds};
use crate::combiner::SelectPartitionFn;
use crate::collection::PrivateCollection;
use crate::error::{AggregationError, Result};
use crate::pipeline::{Executor, LocalExecutor};
use crate::selection::{PartitionSelectionStrategy, PartitionSelector};

/// Parameters for [`distinct_privacy_id`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctPrivacyIdParams<K> {
    pub noise_kind: Option<NoiseKind>,
    pub epsilon: f64,
    pub delta: f64,
    pub max_partitions_contributed: Option<i64>,
    #[serde(skip)]
    pub public_partitions: Option<BTreeSet<K>>,
    #[serde(default)]
    pub partition_selection: PartitionSelectionStrategy,
}

impl<K> Default for DistinctPrivacyIdParams<K> {
    fn default() -> Self {
        Self {
            noise_kind: None,
            epsilon: 0.0,
            delta: 0.0,
            max_partitions_contributed: None,
            public_partitions: None,
            partition_selection: PartitionSelectionStrategy::default(),
        }
    }
}

/// Count distinct identifiers per partition with differential privacy
///
/// Repeated records of one identifier in one partition count once.
pub fn distinct_privacy_id<Id, K>(
    collection: &PrivateCollection<Id, K>,
    params: DistinctPrivacyIdParams<K>,
) -> Result<Vec<(K, i64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
{
    distinct_privacy_id_with(&LocalExecutor, collection, params)
}

#[tracing::instrument(
    skip_all,
    fields(operation = "DistinctPrivacyId", records = collection.len())
)]
pub fn distinct_privacy_id_with<Id, K, E>(
    executor: &E,
    collection: &PrivateCollection<Id, K>,
    params: DistinctPrivacyIdParams<K>,
) -> Result<Vec<(K, i64)>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
    E: Executor,
{
    const OPERATION: &str = "DistinctPrivacyId";

    let noise_kind = resolve_noise_kind(OPERATION, params.noise_kind);
    let spec = collection.spec();
    let max_partitions = spec.resolve_max_partitions(OPERATION, params.max_partitions_contributed)?;

    let plan = BoundedAggregation {
        operation: OPERATION,
        noise_kind,
        epsilon: params.epsilon,
        delta: params.delta,
        max_partitions,
        bounds: ValueBounds::new(0.0, 1.0),
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

/// Parameters for [`select_partitions`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectPartitionsParams {
    pub epsilon: f64,
    pub delta: f64,
    pub max_partitions_contributed: Option<i64>,
    #[serde(default = "default_selection_strategy")]
    pub partition_selection: PartitionSelectionStrategy,
    /// Only read by the noisy-threshold strategy; Laplace when unset
    #[serde(default)]
    pub noise_kind: Option<NoiseKind>,
}

fn default_selection_strategy() -> PartitionSelectionStrategy {
    PartitionSelectionStrategy::TruncatedGeometric
}

impl Default for SelectPartitionsParams {
    fn default() -> Self {
        Self {
            epsilon: 0.0,
            delta: 0.0,
            max_partitions_contributed: None,
            partition_selection: default_selection_strategy(),
            noise_kind: None,
        }
    }
}

/// Release the partition keys that are safe to publish, and nothing else
///
/// The whole (ε, δ) goes to selection. The result can serve as the public
/// partitions of later aggregations on other data.
pub fn select_partitions<Id, K>(
    collection: &PrivateCollection<Id, K>,
    params: SelectPartitionsParams,
) -> Result<Vec<K>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
{
    select_partitions_with(&LocalExecutor, collection, params)
}

#[tracing::instrument(
    skip_all,
    fields(operation = "SelectPartitions", records = collection.len())
)]
pub fn select_partitions_with<Id, K, E>(
    executor: &E,
    collection: &PrivateCollection<Id, K>,
    params: SelectPartitionsParams,
) -> Result<Vec<K>>
where
    Id: Ord + Hash + Clone + Send,
    K: Ord + Clone + Send,
    E: Executor,
{
    const OPERATION: &str = "SelectPartitions";

    let noise_kind = match params.partition_selection {
        PartitionSelectionStrategy::NoisyThreshold => {
            resolve_noise_kind(OPERATION, params.noise_kind)
        }
        PartitionSelectionStrategy::TruncatedGeometric => params.noise_kind.unwrap_or_default(),
    };
    let spec = collection.spec();
    let max_partitions = spec.resolve_max_partitions(OPERATION, params.max_partitions_contributed)?;

    let (granted, selector) =
        spec.consume_budget_checked(OPERATION, params.epsilon, params.delta, |epsilon, delta| {
            validate_epsilon(epsilon).map_err(AggregationError::invalid(OPERATION))?;
            validate_delta_strict(delta).map_err(AggregationError::invalid(OPERATION))?;
            PartitionSelector::new(
                params.partition_selection,
                noise_kind,
                epsilon,
                delta,
                max_partitions,
            )
        })?;
    let (rng, sampling_seed) = spec.randomness(granted.index)?;

    let records: Vec<(Id, (K, f64))> = collection
        .records()
        .iter()
        .map(|(id, key)| (id.clone(), (key.clone(), 1.0)))
        .collect();
    let bounder = CrossPartitionBounder::new(max_partitions, sampling_seed);
    let (bounded, _) = bound_contributions(executor, records, &bounder, ValueBounds::new(0.0, 1.0));

    let rows: Vec<(K, ())> = bounded.into_iter().map(|(key, _)| (key, ())).collect();
    let decisions = executor.combine_per_key(rows, &SelectPartitionFn::new(selector, &rng));

    let mut kept = Vec::new();
    for (key, decision) in decisions {
        if decision? {
            kept.push(key);
        }
    }
    tracing::debug!(partitions_kept = kept.len(), "partition selection complete");
    Ok(kept)
}
