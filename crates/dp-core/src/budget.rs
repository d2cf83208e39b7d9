//! Privacy Budget Accounting
//!
//! Tracks how much of a dataset's total (ε, δ) has been handed out to
//! aggregations, under basic composition: total ε = Σεᵢ, total δ = Σδᵢ.
//!
//! # Allocation Rules
//!
//! - A request of (0, 0) means "everything that is left". It is only
//!   meaningful for the sole aggregation on a dataset, so it is refused once
//!   any budget has been spent.
//! - Any other request is granted only if it fits in what remains.
//! - A refused request leaves the ledger untouched.
//!
//! Allocation is split in two steps, [`BudgetAccountant::resolve`] and
//! [`BudgetAccountant::commit`], so a caller holding the ledger lock can
//! validate the granted values before anything is deducted.

use serde::{Deserialize, Serialize};

/// Slack for float drift when a request equals the remaining budget
const TOLERANCE: f64 = 1e-12;

/// Error type for budget operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BudgetError {
    /// Request exceeds what remains
    Exhausted {
        requested_epsilon: f64,
        requested_delta: f64,
        remaining_epsilon: f64,
        remaining_delta: f64,
    },
    /// A whole-budget request after part of the budget was already spent
    AmbiguousFullRequest {
        consumed_epsilon: f64,
        consumed_delta: f64,
    },
    /// Invalid budget parameters
    InvalidParameter(String),
    /// Budget operation failed
    OperationFailed(String),
}

impl std::fmt::Display for BudgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetError::Exhausted {
                requested_epsilon,
                requested_delta,
                remaining_epsilon,
                remaining_delta,
            } => write!(
                f,
                "Privacy budget exhausted: need (ε={:.4}, δ={:.2e}), have (ε={:.4}, δ={:.2e})",
                requested_epsilon, requested_delta, remaining_epsilon, remaining_delta
            ),
            BudgetError::AmbiguousFullRequest {
                consumed_epsilon,
                consumed_delta,
            } => write!(
                f,
                "Cannot allocate the whole budget: (ε={:.4}, δ={:.2e}) already consumed; \
                 specify epsilon and delta explicitly",
                consumed_epsilon, consumed_delta
            ),
            BudgetError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            BudgetError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
        }
    }
}

impl std::error::Error for BudgetError {}

/// One granted allocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub epsilon: f64,
    pub delta: f64,
}

/// A resolved but not yet committed allocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetGrant {
    pub epsilon: f64,
    pub delta: f64,
    /// The grant hands out everything that remains
    pub whole_budget: bool,
}

/// Privacy budget ledger for one logical dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAccountant {
    total_epsilon: f64,
    total_delta: f64,
    consumed_epsilon: f64,
    consumed_delta: f64,
    allocations: Vec<Allocation>,
    /// Set by a whole-budget grant; nothing can be allocated afterwards
    exhausted: bool,
}

impl BudgetAccountant {
    /// Create a ledger holding `(total_epsilon, total_delta)`
    ///
    /// # Returns
    /// * `Err(BudgetError::InvalidParameter)` unless ε is finite and positive
    ///   and δ is in [0, 1)
    pub fn new(total_epsilon: f64, total_delta: f64) -> Result<Self, BudgetError> {
        if !total_epsilon.is_finite() || total_epsilon <= 0.0 {
            return Err(BudgetError::InvalidParameter(format!(
                "Total epsilon must be finite and positive, got {}",
                total_epsilon
            )));
        }
        if !total_delta.is_finite() || !(0.0..1.0).contains(&total_delta) {
            return Err(BudgetError::InvalidParameter(format!(
                "Total delta must be in [0, 1), got {}",
                total_delta
            )));
        }
        Ok(Self {
            total_epsilon,
            total_delta,
            consumed_epsilon: 0.0,
            consumed_delta: 0.0,
            allocations: Vec::new(),
            exhausted: false,
        })
    }

    pub fn total_epsilon(&self) -> f64 {
        self.total_epsilon
    }

    pub fn total_delta(&self) -> f64 {
        self.total_delta
    }

    pub fn consumed_epsilon(&self) -> f64 {
        self.consumed_epsilon
    }

    pub fn consumed_delta(&self) -> f64 {
        self.consumed_delta
    }

    pub fn remaining_epsilon(&self) -> f64 {
        if self.exhausted {
            return 0.0;
        }
        (self.total_epsilon - self.consumed_epsilon).max(0.0)
    }

    pub fn remaining_delta(&self) -> f64 {
        if self.exhausted {
            return 0.0;
        }
        (self.total_delta - self.consumed_delta).max(0.0)
    }

    /// Number of allocations granted so far
    pub fn query_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Work out what a request would be granted, without deducting it
    pub fn resolve(&self, epsilon: f64, delta: f64) -> Result<BudgetGrant, BudgetError> {
        if !epsilon.is_finite() || epsilon < 0.0 || !delta.is_finite() || delta < 0.0 {
            return Err(BudgetError::InvalidParameter(format!(
                "Requested budget must be finite and non-negative, got (ε={}, δ={})",
                epsilon, delta
            )));
        }

        if epsilon == 0.0 && delta == 0.0 {
            if self.exhausted || self.consumed_epsilon > 0.0 || self.consumed_delta > 0.0 {
                return Err(BudgetError::AmbiguousFullRequest {
                    consumed_epsilon: self.consumed_epsilon,
                    consumed_delta: self.consumed_delta,
                });
            }
            return Ok(BudgetGrant {
                epsilon: self.total_epsilon,
                delta: self.total_delta,
                whole_budget: true,
            });
        }

        let remaining_epsilon = self.remaining_epsilon();
        let remaining_delta = self.remaining_delta();
        if self.exhausted
            || epsilon > remaining_epsilon + TOLERANCE
            || delta > remaining_delta + TOLERANCE
        {
            return Err(BudgetError::Exhausted {
                requested_epsilon: epsilon,
                requested_delta: delta,
                remaining_epsilon,
                remaining_delta,
            });
        }

        // Clamp to the remainder so drift never pushes the total past the cap
        Ok(BudgetGrant {
            epsilon: epsilon.min(remaining_epsilon),
            delta: delta.min(remaining_delta),
            whole_budget: false,
        })
    }

    /// Deduct a grant previously returned by [`Self::resolve`]
    pub fn commit(&mut self, grant: BudgetGrant) {
        self.consumed_epsilon += grant.epsilon;
        self.consumed_delta += grant.delta;
        self.allocations.push(Allocation {
            epsilon: grant.epsilon,
            delta: grant.delta,
        });
        if grant.whole_budget {
            self.exhausted = true;
        }
    }

    /// Resolve and commit in one step
    ///
    /// # Returns
    /// * `Ok((epsilon, delta))` actually granted
    /// * `Err(BudgetError)` with the ledger unchanged
    pub fn consume_budget(&mut self, epsilon: f64, delta: f64) -> Result<(f64, f64), BudgetError> {
        let grant = self.resolve(epsilon, delta)?;
        self.commit(grant);
        tracing::debug!(
            epsilon = grant.epsilon,
            delta = grant.delta,
            remaining_epsilon = self.remaining_epsilon(),
            remaining_delta = self.remaining_delta(),
            "privacy budget consumed"
        );
        Ok((grant.epsilon, grant.delta))
    }

    /// Serialize the ledger state for persistence
    pub fn to_bytes(&self) -> Result<Vec<u8>, BudgetError> {
        serde_json::to_vec(self)
            .map_err(|e| BudgetError::OperationFailed(format!("Serialization failed: {}", e)))
    }

    /// Restore a ledger saved with [`Self::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BudgetError> {
        serde_json::from_slice(bytes)
            .map_err(|e| BudgetError::OperationFailed(format!("Deserialization failed: {}", e)))
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Granted allocations never sum past the totals
        #[test]
        fn budget_conservation(
            total_epsilon in 0.1..10.0f64,
            total_delta in 0.0..1e-3f64,
            requests in proptest::collection::vec((0.0..2.0f64, 0.0..5e-4f64), 1..50)
        ) {
            let mut budget = BudgetAccountant::new(total_epsilon, total_delta).unwrap();
            let mut granted_epsilon = 0.0;
            let mut granted_delta = 0.0;

            for (epsilon, delta) in requests {
                if let Ok((e, d)) = budget.consume_budget(epsilon, delta) {
                    granted_epsilon += e;
                    granted_delta += d;
                }
                prop_assert!(granted_epsilon <= total_epsilon + 1e-9);
                prop_assert!(granted_delta <= total_delta + 1e-15);
                prop_assert!(budget.remaining_epsilon() >= 0.0);
            }
        }

        /// A refused request leaves the ledger unchanged
        #[test]
        fn refusal_is_side_effect_free(
            total in 0.1..5.0f64,
            first in 0.01..1.0f64,
            second in 0.0..10.0f64
        ) {
            let mut budget = BudgetAccountant::new(total, 0.0).unwrap();
            let _ = budget.consume_budget(first, 0.0);
            let consumed = budget.consumed_epsilon();
            let count = budget.query_count();

            if budget.consume_budget(second, 0.0).is_err() {
                prop_assert_eq!(budget.consumed_epsilon(), consumed);
                prop_assert_eq!(budget.query_count(), count);
            }
        }

        /// Remaining budget never increases
        #[test]
        fn remaining_is_monotone(
            total in 1.0..100.0f64,
            requests in proptest::collection::vec(0.01..1.0f64, 1..50)
        ) {
            let mut budget = BudgetAccountant::new(total, 0.0).unwrap();
            let mut prev = budget.remaining_epsilon();
            for epsilon in requests {
                let _ = budget.consume_budget(epsilon, 0.0);
                let current = budget.remaining_epsilon();
                prop_assert!(current <= prev);
                prev = current;
            }
        }
    }
}
