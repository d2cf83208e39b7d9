//! Input Validation for Differential Privacy Parameters
//!
//! Every check here runs before a single record is read. A failed check is
//! a configuration mistake, never a transient fault, so callers propagate it
//! and abort the aggregation.
//!
//! # Parameter Constraints
//!
//! ## Epsilon (ε)
//! - Must be finite and positive (> 0)
//!
//! ## Delta (δ)
//! - Must be in [0, 1)
//! - Strictly positive when thresholding or Gaussian noise consumes it
//! - Exactly 0 when nothing consumes it (public partitions with Laplace noise)
//!
//! ## Contribution bounds
//! - `max_partitions_contributed` must be a positive integer
//! - `MaxValue` must be strictly positive; `[MinValue, MaxValue]` finite and ordered

use serde::{Deserialize, Serialize};

/// Error type for DP parameter validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DpValidationError {
    /// Epsilon is invalid
    InvalidEpsilon { value: f64, reason: String },
    /// Delta is invalid
    InvalidDelta { value: f64, reason: String },
    /// Sensitivity is invalid
    InvalidSensitivity { value: f64, reason: String },
    /// A contribution bound is invalid
    InvalidBound { name: String, reason: String },
}

impl std::fmt::Display for DpValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEpsilon { value, reason } => write!(f, "epsilon {}: {}", value, reason),
            Self::InvalidDelta { value, reason } => write!(f, "delta {}: {}", value, reason),
            Self::InvalidSensitivity { value, reason } => {
                write!(f, "sensitivity {}: {}", value, reason)
            }
            Self::InvalidBound { name, reason } => write!(f, "{}: {}", name, reason),
        }
    }
}

impl std::error::Error for DpValidationError {}

/// Smallest accepted ε; anything below calibrates to unbounded noise
pub const MIN_EPSILON: f64 = 1e-10;

/// Smallest accepted sensitivity; anything below is a computation error
pub const MIN_SENSITIVITY: f64 = 1e-15;

/// ε must be finite and at least [`MIN_EPSILON`]
pub fn validate_epsilon(epsilon: f64) -> Result<(), DpValidationError> {
    let reason = if !epsilon.is_finite() {
        "must be a finite number".to_string()
    } else if epsilon <= 0.0 {
        "must be strictly positive".to_string()
    } else if epsilon < MIN_EPSILON {
        format!("below {}, noise would be unbounded", MIN_EPSILON)
    } else {
        return Ok(());
    };
    Err(DpValidationError::InvalidEpsilon {
        value: epsilon,
        reason,
    })
}

/// δ must lie in [0, 1)
pub fn validate_delta(delta: f64) -> Result<(), DpValidationError> {
    if delta.is_finite() && (0.0..1.0).contains(&delta) {
        return Ok(());
    }
    Err(DpValidationError::InvalidDelta {
        value: delta,
        reason: "must be in [0, 1)".to_string(),
    })
}

/// Validate a delta that some mechanism actually spends: (0, 1)
pub fn validate_delta_strict(delta: f64) -> Result<(), DpValidationError> {
    validate_delta(delta)?;
    if delta == 0.0 {
        return Err(DpValidationError::InvalidDelta {
            value: delta,
            reason: "must be strictly positive for partition selection or Gaussian noise"
                .to_string(),
        });
    }
    Ok(())
}

/// Validate that no delta is requested
pub fn validate_no_delta(delta: f64) -> Result<(), DpValidationError> {
    if delta != 0.0 {
        return Err(DpValidationError::InvalidDelta {
            value: delta,
            reason: "must be 0: no mechanism in this configuration consumes it".to_string(),
        });
    }
    Ok(())
}

/// Sensitivity must be finite and at least [`MIN_SENSITIVITY`]
pub fn validate_sensitivity(sensitivity: f64) -> Result<(), DpValidationError> {
    if sensitivity.is_finite() && sensitivity >= MIN_SENSITIVITY {
        return Ok(());
    }
    Err(DpValidationError::InvalidSensitivity {
        value: sensitivity,
        reason: format!("must be finite and at least {}", MIN_SENSITIVITY),
    })
}

/// Validate the cross-partition contribution bound
pub fn validate_max_partitions_contributed(max_partitions: i64) -> Result<(), DpValidationError> {
    if max_partitions <= 0 {
        return Err(DpValidationError::InvalidBound {
            name: "MaxPartitionsContributed".to_string(),
            reason: format!("must be a positive integer, got {}", max_partitions),
        });
    }
    Ok(())
}

/// Validate the upper bound of a per-partition contribution
pub fn validate_max_value(max_value: f64) -> Result<(), DpValidationError> {
    if !max_value.is_finite() || max_value <= 0.0 {
        return Err(DpValidationError::InvalidBound {
            name: "MaxValue".to_string(),
            reason: format!("should be strictly positive, got {}", max_value),
        });
    }
    Ok(())
}

/// Validate a `[min_value, max_value]` clamping interval: finite and ordered
pub fn validate_value_bounds(min_value: f64, max_value: f64) -> Result<(), DpValidationError> {
    if !min_value.is_finite() || !max_value.is_finite() {
        return Err(DpValidationError::InvalidBound {
            name: "value bounds".to_string(),
            reason: format!("must be finite, got [{}, {}]", min_value, max_value),
        });
    }
    if min_value > max_value {
        return Err(DpValidationError::InvalidBound {
            name: "value bounds".to_string(),
            reason: format!("MinValue {} exceeds MaxValue {}", min_value, max_value),
        });
    }
    Ok(())
}
