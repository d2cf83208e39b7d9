//! Partition selection
//!
//! Without a public partition list, the set of partition keys is itself
//! private: a key seen by a single identifier reveals that identifier. Each
//! partition is therefore published only if a randomized test on its
//! number of distinct contributing identifiers passes. The test is tuned so
//! a partition backed by one identifier is released with probability at
//! most δ / max_partitions.
//!
//! Two strategies:
//!
//! - [`PartitionSelectionStrategy::NoisyThreshold`]: add noise of the
//!   aggregation's kind to the count and compare it with a threshold.
//! - [`PartitionSelectionStrategy::TruncatedGeometric`]: keep with the
//!   optimal probability π(n) for (ε, δ)-DP selection, which never depends
//!   on a noise kind.

use mycelix_dp_core::{
    validate_delta_strict, validate_epsilon, CalibratedNoise, NoiseKind, SecureRng,
};
use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};

const OPERATION: &str = "PartitionSelection";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PartitionSelectionStrategy {
    /// Noised distinct-identifier count against a calibrated threshold
    #[default]
    NoisyThreshold,
    /// Keep with the optimal truncated-geometric probability
    TruncatedGeometric,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    NoisyThreshold { noise: CalibratedNoise, threshold: f64 },
    TruncatedGeometric { epsilon: f64, delta: f64 },
}

/// Per-partition keep/suppress decision, calibrated once per aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionSelector {
    rule: Rule,
}

impl PartitionSelector {
    /// Calibrate for the selection share `(epsilon, delta)` of the budget
    ///
    /// `max_partitions` is the cross-partition bound: one identifier can
    /// raise the count of that many partitions by one each. Both ε and δ
    /// must be strictly positive.
    pub fn new(
        strategy: PartitionSelectionStrategy,
        noise_kind: NoiseKind,
        epsilon: f64,
        delta: f64,
        max_partitions: i64,
    ) -> Result<Self> {
        validate_epsilon(epsilon).map_err(AggregationError::invalid(OPERATION))?;
        validate_delta_strict(delta).map_err(AggregationError::invalid(OPERATION))?;
        if max_partitions <= 0 {
            return Err(AggregationError::configuration(
                OPERATION,
                format!("max_partitions must be positive, got {}", max_partitions),
            ));
        }
        let partitions = max_partitions as f64;

        let rule = match strategy {
            PartitionSelectionStrategy::NoisyThreshold => {
                // Gaussian noise spends half of δ itself; the tail gets the rest
                let (noise_delta, threshold_delta) = match noise_kind {
                    NoiseKind::Laplace => (0.0, delta),
                    NoiseKind::Gaussian => (delta / 2.0, delta - delta / 2.0),
                };
                let noise = CalibratedNoise::new(noise_kind, partitions, epsilon, noise_delta)?;
                let threshold = 1.0 + noise.upper_tail_quantile(threshold_delta / partitions)?;
                Rule::NoisyThreshold { noise, threshold }
            }
            PartitionSelectionStrategy::TruncatedGeometric => Rule::TruncatedGeometric {
                epsilon: epsilon / partitions,
                delta: delta / partitions,
            },
        };
        Ok(Self { rule })
    }

    /// Threshold on the noised count, for the noisy-threshold strategy
    pub fn threshold(&self) -> Option<f64> {
        match self.rule {
            Rule::NoisyThreshold { threshold, .. } => Some(threshold),
            Rule::TruncatedGeometric { .. } => None,
        }
    }

    /// Decide whether a partition with `identifiers` distinct contributors
    /// is published. Empty partitions never are.
    pub fn should_keep(&self, identifiers: i64, rng: &SecureRng) -> Result<bool> {
        if identifiers <= 0 {
            return Ok(false);
        }
        match self.rule {
            Rule::NoisyThreshold { noise, threshold } => {
                Ok(noise.add_noise(identifiers as f64, rng)? >= threshold)
            }
            Rule::TruncatedGeometric { epsilon, delta } => {
                let probability = keep_partition_probability(identifiers, epsilon, delta);
                Ok(rng.random_f64_uniform()? < probability)
            }
        }
    }
}

/// Optimal keep probability π(n) for (ε, δ)-DP partition selection
///
/// π(0) = 0 and
/// π(n) = min(e^ε·π(n−1) + δ, 1 − e^(−ε)·(1 − δ − π(n−1)), 1).
/// ε and δ are per-partition values.
pub fn keep_partition_probability(identifiers: i64, epsilon: f64, delta: f64) -> f64 {
    let growth = epsilon.exp();
    let decay = (-epsilon).exp();
    let mut probability: f64 = 0.0;
    for _ in 0..identifiers.max(0) {
        probability = (growth * probability + delta)
            .min(1.0 - decay * (1.0 - delta - probability))
            .min(1.0);
        if probability >= 1.0 {
            return 1.0;
        }
    }
    probability
}


#[cfg(test)]
mod proptest_tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// π(n+1) <= e^ε·π(n) + δ, the DP constraint between neighbours
        #[test]
        fn prop_keep_probability_respects_privacy(
            n in 0i64..200,
            epsilon in 0.01f64..3.0,
            delta in 1e-9f64..1e-2,
        ) {
            let p = keep_partition_probability(n, epsilon, delta);
            let next = keep_partition_probability(n + 1, epsilon, delta);
            prop_assert!(next <= epsilon.exp() * p + delta + 1e-12);
            prop_assert!(next >= p);
        }
    }
}
