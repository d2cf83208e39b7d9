//! Laplace Mechanism for Differential Privacy
//!
//! Implements the classic Laplace mechanism for achieving (ε, 0)-differential privacy.
//!
//! # Mathematical Foundation
//!
//! For a numeric query f with L1 sensitivity Δf, the Laplace mechanism adds
//! noise drawn from the Laplace distribution:
//!
//! ```text
//! M(D) = f(D) + Lap(0, Δf/ε)
//! ```
//!
//! # Inverse CDF Sampling
//!
//! ```text
//! F^(-1)(u) = -b * sign(u - 0.5) * ln(1 - 2|u - 0.5|)
//! ```
//!
//! For u ~ Uniform(0, 1), F^(-1)(u) ~ Laplace(0, b)

use super::rng::{RngError, SecureRng};
use super::validation::{validate_epsilon, validate_sensitivity, DpValidationError};

/// Error type for Laplace mechanism operations
#[derive(Debug, Clone, PartialEq)]
pub enum LaplaceError {
    /// RNG failure
    Rng(RngError),
    /// Invalid parameters
    Validation(String),
}

impl std::fmt::Display for LaplaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaplaceError::Rng(e) => write!(f, "RNG error: {}", e),
            LaplaceError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for LaplaceError {}

impl From<RngError> for LaplaceError {
    fn from(e: RngError) -> Self {
        LaplaceError::Rng(e)
    }
}

impl From<DpValidationError> for LaplaceError {
    fn from(e: DpValidationError) -> Self {
        LaplaceError::Validation(e.to_string())
    }
}

/// Laplace mechanism for (ε, 0)-differential privacy
pub struct LaplaceMechanism;

impl LaplaceMechanism {
    /// Sample from Laplace(0, scale)
    ///
    /// For U ~ Uniform(-0.5, 0.5): X = -scale * sign(U) * ln(1 - 2|U|)
    pub fn sample(rng: &SecureRng, scale: f64) -> Result<f64, LaplaceError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(LaplaceError::Validation(
                "Scale must be positive and finite".to_string(),
            ));
        }

        let u = rng.random_f64_centered()?;
        Ok(-scale * u.signum() * (1.0 - 2.0 * u.abs()).ln())
    }

    /// scale = Δf / ε
    pub fn compute_scale(sensitivity: f64, epsilon: f64) -> Result<f64, LaplaceError> {
        validate_sensitivity(sensitivity)?;
        validate_epsilon(epsilon)?;
        Ok(sensitivity / epsilon)
    }

    /// Var(Lap(0, b)) = 2b²
    pub fn variance(scale: f64) -> f64 {
        2.0 * scale * scale
    }

    /// Smallest x with P[Lap(0, scale) > x] <= tail
    ///
    /// For tail <= 0.5 the survival function is 0.5·e^(-x/b), so
    /// x = -b·ln(2·tail).
    pub fn upper_tail_quantile(scale: f64, tail: f64) -> Result<f64, LaplaceError> {
        if !(tail > 0.0 && tail < 1.0) {
            return Err(LaplaceError::Validation(format!(
                "Tail probability must be in (0, 1), got {}",
                tail
            )));
        }
        if tail <= 0.5 {
            Ok(-scale * (2.0 * tail).ln())
        } else {
            Ok(scale * (2.0 * (1.0 - tail)).ln())
        }
    }
}
