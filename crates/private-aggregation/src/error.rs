//! Error taxonomy for aggregation calls
//!
//! Every variant is fatal to the call that raised it. Nothing here is
//! retryable: each one reflects a configuration mistake or an exhausted
//! budget, and proceeding anyway could leak private information.

use mycelix_dp_core::{BudgetError, DpValidationError, NoiseError, RngError};

/// Result type for aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// Invalid ε/δ, non-positive bounds, or a contradictory noise/δ pair
    #[error("{operation}: invalid configuration: {reason}")]
    Configuration {
        operation: &'static str,
        reason: String,
    },

    /// The request does not fit in the spec's remaining budget
    #[error("{operation}: couldn't consume budget: {source}")]
    BudgetExceeded {
        operation: &'static str,
        #[source]
        source: BudgetError,
    },

    #[error("noise generation failed: {0}")]
    Noise(#[from] NoiseError),

    #[error("random generator failed: {0}")]
    Rng(#[from] RngError),

    /// The budget ledger mutex was poisoned; fail closed
    #[error("privacy budget ledger unavailable (poisoned lock)")]
    LedgerUnavailable,
}

impl AggregationError {
    pub(crate) fn configuration(operation: &'static str, reason: impl ToString) -> Self {
        AggregationError::Configuration {
            operation,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(operation: &'static str) -> impl FnOnce(DpValidationError) -> Self {
        move |e| AggregationError::configuration(operation, e)
    }

    pub(crate) fn budget(operation: &'static str, error: BudgetError) -> Self {
        match error {
            BudgetError::InvalidParameter(reason) => {
                AggregationError::Configuration { operation, reason }
            }
            source => AggregationError::BudgetExceeded { operation, source },
        }
    }

    /// True for [`AggregationError::BudgetExceeded`]
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, AggregationError::BudgetExceeded { .. })
    }

    /// True for [`AggregationError::Configuration`]
    pub fn is_configuration(&self) -> bool {
        matches!(self, AggregationError::Configuration { .. })
    }
}
