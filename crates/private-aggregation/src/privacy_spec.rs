//! Privacy spec: the shared budget ledger for one logical dataset
//!
//! A [`PrivacySpec`] is created once, before any aggregation, and handed by
//! reference (usually an `Arc`) to every aggregation over the same data.
//! It is the only shared mutable state in the pipeline; allocation is
//! serialized by a mutex and happens once per aggregation call.

use std::sync::{Mutex, MutexGuard};

use mycelix_dp_core::{validate_max_partitions_contributed, BudgetAccountant, SecureRng};
use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};

/// Serializable settings for a [`PrivacySpec`]
///
/// ```
/// use mycelix_private_aggregation::PrivacySpecConfig;
///
/// let config = PrivacySpecConfig::from_json(
///     r#"{ "epsilon": 1.0, "delta": 1e-5, "max_partitions_contributed": 3 }"#,
/// ).unwrap();
/// assert_eq!(config.max_partitions_contributed, Some(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivacySpecConfig {
    /// Total ε available for the dataset
    pub epsilon: f64,
    /// Total δ available for the dataset
    #[serde(default)]
    pub delta: f64,
    /// Used when an aggregation does not set its own bound
    #[serde(default)]
    pub max_partitions_contributed: Option<i64>,
    /// Fixed seed for sampling and noise; OS entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PrivacySpecConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AggregationError::configuration("PrivacySpec", e))
    }
}

/// Budget granted to one aggregation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GrantedBudget {
    pub epsilon: f64,
    pub delta: f64,
    /// Position of this grant in the ledger
    pub index: u64,
}

/// Total privacy budget and defaults shared by a dataset's aggregations
#[derive(Debug)]
pub struct PrivacySpec {
    ledger: Mutex<BudgetAccountant>,
    default_max_partitions_contributed: Option<i64>,
    seed: Option<u64>,
}

impl PrivacySpec {
    /// Create a spec holding `(epsilon, delta)` in total
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        let ledger = BudgetAccountant::new(epsilon, delta)
            .map_err(|e| AggregationError::budget("PrivacySpec", e))?;
        Ok(Self {
            ledger: Mutex::new(ledger),
            default_max_partitions_contributed: None,
            seed: None,
        })
    }

    pub fn from_config(config: PrivacySpecConfig) -> Result<Self> {
        let mut spec = Self::new(config.epsilon, config.delta)?;
        if let Some(bound) = config.max_partitions_contributed {
            spec = spec.with_max_partitions_contributed(bound)?;
        }
        spec.seed = config.seed;
        Ok(spec)
    }

    /// Default cross-partition bound for aggregations that leave it unset
    pub fn with_max_partitions_contributed(
        mut self,
        max_partitions: i64,
    ) -> Result<Self> {
        validate_max_partitions_contributed(max_partitions)
            .map_err(AggregationError::invalid("PrivacySpec"))?;
        self.default_max_partitions_contributed = Some(max_partitions);
        Ok(self)
    }

    /// Make sampling and noise reproducible. Intended for tests only.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn default_max_partitions_contributed(&self) -> Option<i64> {
        self.default_max_partitions_contributed
    }

    fn ledger(&self) -> Result<MutexGuard<'_, BudgetAccountant>> {
        self.ledger
            .lock()
            .map_err(|_| AggregationError::LedgerUnavailable)
    }

    /// Allocate budget to a caller outside the built-in aggregations
    ///
    /// (0, 0) takes the whole budget and is only valid on an untouched spec.
    pub fn consume_budget(&self, epsilon: f64, delta: f64) -> Result<(f64, f64)> {
        let (granted, ()) =
            self.consume_budget_checked("PrivacySpec", epsilon, delta, |_, _| Ok(()))?;
        Ok((granted.epsilon, granted.delta))
    }

    /// Resolve a request, run `check` on the granted values, then commit
    ///
    /// The ledger lock is held throughout, so a failing check leaves the
    /// budget untouched and no other call can interleave. Whatever `check`
    /// builds from the grant is handed back with it.
    pub(crate) fn consume_budget_checked<T>(
        &self,
        operation: &'static str,
        epsilon: f64,
        delta: f64,
        check: impl FnOnce(f64, f64) -> Result<T>,
    ) -> Result<(GrantedBudget, T)> {
        let mut ledger = self.ledger()?;
        let grant = match ledger.resolve(epsilon, delta) {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(
                    operation,
                    requested_epsilon = epsilon,
                    requested_delta = delta,
                    "budget request refused"
                );
                return Err(AggregationError::budget(operation, e));
            }
        };
        let checked = check(grant.epsilon, grant.delta)?;

        let index = ledger.query_count() as u64;
        ledger.commit(grant);
        tracing::debug!(
            operation,
            epsilon = grant.epsilon,
            delta = grant.delta,
            whole_budget = grant.whole_budget,
            remaining_epsilon = ledger.remaining_epsilon(),
            remaining_delta = ledger.remaining_delta(),
            "privacy budget consumed"
        );
        let granted = GrantedBudget {
            epsilon: grant.epsilon,
            delta: grant.delta,
            index,
        };
        Ok((granted, checked))
    }

    /// Remaining (ε, δ)
    pub fn remaining_budget(&self) -> Result<(f64, f64)> {
        let ledger = self.ledger()?;
        Ok((ledger.remaining_epsilon(), ledger.remaining_delta()))
    }

    /// Copy of the ledger for inspection or persistence
    pub fn ledger_snapshot(&self) -> Result<BudgetAccountant> {
        Ok(self.ledger()?.clone())
    }

    /// Bound from the params, falling back to the spec default
    pub(crate) fn resolve_max_partitions(
        &self,
        operation: &'static str,
        requested: Option<i64>,
    ) -> Result<i64> {
        let bound = match (requested, self.default_max_partitions_contributed) {
            (Some(bound), _) => bound,
            (None, Some(default)) => {
                tracing::info!(
                    operation,
                    max_partitions_contributed = default,
                    "MaxPartitionsContributed not set, using the spec default"
                );
                default
            }
            (None, None) => {
                return Err(AggregationError::configuration(
                    operation,
                    "MaxPartitionsContributed is required (no default on the PrivacySpec)",
                ))
            }
        };
        validate_max_partitions_contributed(bound).map_err(AggregationError::invalid(operation))?;
        Ok(bound)
    }

    /// Noise generator and sampling seed for the grant at `index`
    ///
    /// With a fixed spec seed each aggregation gets its own derived seed, so
    /// two aggregations never replay the same noise.
    pub(crate) fn randomness(&self, index: u64) -> Result<(SecureRng, u64)> {
        let derived = self
            .seed
            .map(|seed| seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15)));
        let rng = SecureRng::from_optional_seed(derived)?;
        let sampling_seed = match derived {
            Some(derived) => derived.rotate_left(32),
            None => rng.random_u64()?,
        };
        Ok((rng, sampling_seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_config() {
        let config = PrivacySpecConfig::from_json(r#"{ "epsilon": 2.0, "delta": 1e-6, "seed": 9 }"#)
            .unwrap();
        let spec = PrivacySpec::from_config(config).unwrap();
        assert_eq!(spec.remaining_budget().unwrap(), (2.0, 1e-6));
        assert_eq!(spec.seed(), Some(9));
        assert_eq!(spec.default_max_partitions_contributed(), None);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        assert!(PrivacySpec::new(0.0, 1e-5).unwrap_err().is_configuration());
        assert!(PrivacySpec::new(1.0, 1e-5)
            .unwrap()
            .with_max_partitions_contributed(0)
            .is_err());
        assert!(PrivacySpecConfig::from_json("{ \"delta\": 0.1 }").is_err());
    }

    #[test]
    fn test_failed_check_leaves_budget_untouched() {
        let spec = PrivacySpec::new(1.0, 1e-5).unwrap();
        let result = spec.consume_budget_checked("Test", 0.5, 0.0, |_, _| -> Result<()> {
            Err(AggregationError::configuration("Test", "rejected"))
        });
        assert!(result.unwrap_err().is_configuration());
        assert_eq!(spec.remaining_budget().unwrap(), (1.0, 1e-5));
        assert_eq!(spec.ledger_snapshot().unwrap().query_count(), 0);
    }

    #[test]
    fn test_zero_request_after_partial_use() {
        let spec = PrivacySpec::new(1.0, 1e-5).unwrap();
        spec.consume_budget(0.25, 1e-6).unwrap();
        let err = spec.consume_budget(0.0, 0.0).unwrap_err();
        assert!(err.is_budget_exceeded());
    }

    #[test]
    fn test_grant_indices_increase() {
        let spec = PrivacySpec::new(1.0, 0.0).unwrap();
        let (a, ()) = spec.consume_budget_checked("Test", 0.1, 0.0, |_, _| Ok(())).unwrap();
        let (b, ()) = spec.consume_budget_checked("Test", 0.1, 0.0, |_, _| Ok(())).unwrap();
        assert_eq!((a.index, b.index), (0, 1));
    }

    #[test]
    fn test_resolve_max_partitions() {
        let spec = PrivacySpec::new(1.0, 0.0)
            .unwrap()
            .with_max_partitions_contributed(4)
            .unwrap();
        assert_eq!(spec.resolve_max_partitions("Test", None).unwrap(), 4);
        assert_eq!(spec.resolve_max_partitions("Test", Some(2)).unwrap(), 2);
        assert!(spec.resolve_max_partitions("Test", Some(0)).is_err());

        let bare = PrivacySpec::new(1.0, 0.0).unwrap();
        assert!(bare.resolve_max_partitions("Test", None).is_err());
    }

    #[test]
    fn test_seeded_randomness_is_reproducible_per_grant() {
        let spec = PrivacySpec::new(1.0, 0.0).unwrap().with_seed(3);
        let (rng_a, seed_a) = spec.randomness(0).unwrap();
        let (rng_b, seed_b) = spec.randomness(0).unwrap();
        let (_, seed_c) = spec.randomness(1).unwrap();
        assert_eq!(seed_a, seed_b);
        assert_ne!(seed_a, seed_c);
        assert_eq!(rng_a.random_u64().unwrap(), rng_b.random_u64().unwrap());
    }
}
