//! Shared driver for bounded-sum aggregations
//!
//! Count, sum and distinct-identifier count differ only in their clamping
//! interval and output type. All three go through [`BoundedAggregation`]:
//!
//! 1. consume budget, calibrating noise and selection under the ledger lock
//! 2. drop records outside the public partitions, if any
//! 3. bound contributions
//! 4. add public placeholders, or prepare partition selection
//! 5. combine, select, noise and clamp to zero per partition
//!
//! Parameter checks that do not depend on the granted budget run in the
//! callers, before this driver is built.

use std::collections::BTreeSet;
use std::hash::Hash;

use mycelix_dp_core::{
    contribution_sensitivity, validate_delta_strict, validate_epsilon, validate_no_delta,
    validate_sensitivity, CalibratedNoise, NoiseKind,
};

use crate::bounding::{bound_contributions, CrossPartitionBounder, ValueBounds};
use crate::combiner::{BoundedSumFn, BudgetSplit, Contribution};
use crate::error::{AggregationError, Result};
use crate::pipeline::Executor;
use crate::privacy_spec::PrivacySpec;
use crate::public_partitions::{add_public_partitions, drop_non_public_partitions};
use crate::selection::{PartitionSelectionStrategy, PartitionSelector};

/// Noise kind from the params, Laplace when unset
pub(crate) fn resolve_noise_kind(
    operation: &'static str,
    requested: Option<NoiseKind>,
) -> NoiseKind {
    requested.unwrap_or_else(|| {
        tracing::info!(operation, "No NoiseKind specified, using Laplace noise by default");
        NoiseKind::Laplace
    })
}

/// δ rule for a granted budget: exactly 0 when nothing spends it (public
/// partitions with Laplace noise), strictly positive otherwise
pub(crate) fn check_budget(
    operation: &'static str,
    noise_kind: NoiseKind,
    public_partitions: bool,
    epsilon: f64,
    delta: f64,
) -> Result<()> {
    validate_epsilon(epsilon).map_err(AggregationError::invalid(operation))?;
    match (public_partitions, noise_kind) {
        (true, NoiseKind::Laplace) => validate_no_delta(delta),
        _ => validate_delta_strict(delta),
    }
    .map_err(AggregationError::invalid(operation))
}

#[derive(Debug, Clone)]
pub(crate) struct BoundedAggregation<K> {
    pub operation: &'static str,
    pub noise_kind: NoiseKind,
    pub epsilon: f64,
    pub delta: f64,
    pub max_partitions: i64,
    pub bounds: ValueBounds,
    pub public_partitions: Option<BTreeSet<K>>,
    pub strategy: PartitionSelectionStrategy,
}

impl<K> BoundedAggregation<K>
where
    K: Ord + Clone + Send,
{
    fn calibrate(
        &self,
        epsilon: f64,
        delta: f64,
    ) -> Result<(CalibratedNoise, Option<PartitionSelector>)> {
        let public = self.public_partitions.is_some();
        check_budget(self.operation, self.noise_kind, public, epsilon, delta)?;

        let split = BudgetSplit::new(self.noise_kind, epsilon, delta, public);
        let sensitivity =
            contribution_sensitivity(self.max_partitions, self.bounds.max_magnitude());
        validate_sensitivity(sensitivity).map_err(AggregationError::invalid(self.operation))?;
        let noise = CalibratedNoise::new(
            self.noise_kind,
            sensitivity,
            split.noise_epsilon,
            split.noise_delta,
        )?;

        let selector = if public {
            None
        } else {
            Some(PartitionSelector::new(
                self.strategy,
                self.noise_kind,
                split.selection_epsilon,
                split.selection_delta,
                self.max_partitions,
            )?)
        };
        Ok((noise, selector))
    }

    /// Run over `(identifier, (partition, value))` records
    ///
    /// Budget is consumed only once every calibration step has succeeded.
    pub fn run<Id, E>(
        self,
        executor: &E,
        spec: &PrivacySpec,
        records: Vec<(Id, (K, f64))>,
    ) -> Result<Vec<(K, f64)>>
    where
        Id: Ord + Hash + Send,
        E: Executor,
    {
        let (granted, (noise, selector)) =
            spec.consume_budget_checked(self.operation, self.epsilon, self.delta, |epsilon, delta| {
                self.calibrate(epsilon, delta)
            })?;
        let (rng, sampling_seed) = spec.randomness(granted.index)?;

        let records = match &self.public_partitions {
            Some(public) => drop_non_public_partitions(records, public),
            None => records,
        };

        let bounder = CrossPartitionBounder::new(self.max_partitions, sampling_seed);
        let (bounded, _) = bound_contributions(executor, records, &bounder, self.bounds);

        let mut contributions: Vec<(K, Contribution)> = bounded
            .into_iter()
            .map(|(key, value)| (key, Contribution::Bounded(value)))
            .collect();
        if let Some(public) = &self.public_partitions {
            contributions = add_public_partitions(contributions, public);
        }

        let combine = BoundedSumFn::new(noise, selector, &rng);
        let combined = executor.combine_per_key(contributions, &combine);

        let mut published = Vec::with_capacity(combined.len());
        let mut suppressed = 0usize;
        for (key, output) in combined {
            match output? {
                Some(value) => published.push((key, value)),
                None => suppressed += 1,
            }
        }
        tracing::debug!(
            operation = self.operation,
            noise_kind = %self.noise_kind,
            noise_scale = noise.scale(),
            partitions_published = published.len(),
            partitions_suppressed = suppressed,
            "aggregation complete"
        );
        Ok(published)
    }
}
