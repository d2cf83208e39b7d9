//! Gaussian Mechanism for Differential Privacy
//!
//! Implements the Gaussian mechanism for achieving (ε, δ)-differential privacy.
//!
//! # Calibration
//!
//! σ is the smallest value for which the exact privacy loss of N(0, σ²)
//! noise on a query of sensitivity Δ stays within δ (the analytic Gaussian
//! mechanism of Balle & Wang, 2018):
//!
//! ```text
//! δ(σ) = Φ(Δ/2σ − εσ/Δ) − e^ε · Φ(−Δ/2σ − εσ/Δ)
//! ```
//!
//! δ(σ) decreases in σ, so σ is found by bisection. The classical bound
//! σ = Δ·√(2 ln(1.25/δ))/ε only holds for ε < 1 and is not used.
//!
//! # Box-Muller Transform
//!
//! ```text
//! Given U₁, U₂ ~ Uniform(0, 1):
//! Z = √(-2 ln U₁) · cos(2π U₂) ~ N(0, 1)
//! ```

use std::f64::consts::{LN_2, PI, SQRT_2};

use super::rng::{RngError, SecureRng};
use super::validation::{
    validate_delta_strict, validate_epsilon, validate_sensitivity, DpValidationError,
};

const SIGMA_SEARCH_STEPS: usize = 200;
const SIGMA_RELATIVE_TOLERANCE: f64 = 1e-12;

const ERFC_SERIES_LIMIT: f64 = 3.0;
const ERFC_FRACTION_DEPTH: u32 = 200;

/// Error type for Gaussian mechanism operations
#[derive(Debug, Clone, PartialEq)]
pub enum GaussianError {
    /// RNG failure
    Rng(RngError),
    /// Invalid parameters
    Validation(String),
}

impl std::fmt::Display for GaussianError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GaussianError::Rng(e) => write!(f, "RNG error: {}", e),
            GaussianError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for GaussianError {}

impl From<RngError> for GaussianError {
    fn from(e: RngError) -> Self {
        GaussianError::Rng(e)
    }
}

impl From<DpValidationError> for GaussianError {
    fn from(e: DpValidationError) -> Self {
        GaussianError::Validation(e.to_string())
    }
}

/// Gaussian mechanism for (ε, δ)-differential privacy
pub struct GaussianMechanism;

impl GaussianMechanism {
    /// Sample from standard normal N(0, 1) using Box-Muller transform
    pub fn sample_standard_normal(rng: &SecureRng) -> Result<f64, GaussianError> {
        let (u1, u2) = rng.random_pair_for_box_muller()?;
        Ok((-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos())
    }

    /// Sample from N(0, σ²)
    pub fn sample(rng: &SecureRng, sigma: f64) -> Result<f64, GaussianError> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(GaussianError::Validation(
                "Sigma must be positive and finite".to_string(),
            ));
        }

        Ok(Self::sample_standard_normal(rng)? * sigma)
    }

    /// Smallest σ giving (ε, δ)-DP for a query of sensitivity Δ
    pub fn compute_sigma(sensitivity: f64, epsilon: f64, delta: f64) -> Result<f64, GaussianError> {
        validate_sensitivity(sensitivity)?;
        validate_epsilon(epsilon)?;
        validate_delta_strict(delta)?;

        let exceeds = |sigma: f64| privacy_loss_delta(sigma, sensitivity, epsilon) > delta;

        let mut upper = sensitivity;
        while exceeds(upper) {
            upper *= 2.0;
            if !upper.is_finite() {
                return Err(GaussianError::Validation(format!(
                    "No finite sigma reaches delta {} at epsilon {}",
                    delta, epsilon
                )));
            }
        }
        let mut lower = upper / 2.0;
        while !exceeds(lower) {
            upper = lower;
            lower /= 2.0;
            if lower == 0.0 {
                return Ok(upper);
            }
        }

        // exceeds(lower) and !exceeds(upper) hold throughout
        for _ in 0..SIGMA_SEARCH_STEPS {
            let mid = 0.5 * (lower + upper);
            if exceeds(mid) {
                lower = mid;
            } else {
                upper = mid;
            }
            if upper - lower <= upper * SIGMA_RELATIVE_TOLERANCE {
                break;
            }
        }
        Ok(upper)
    }

    /// Smallest x with P[N(0, σ²) > x] <= tail
    pub fn upper_tail_quantile(sigma: f64, tail: f64) -> Result<f64, GaussianError> {
        if !(tail > 0.0 && tail < 1.0) {
            return Err(GaussianError::Validation(format!(
                "Tail probability must be in (0, 1), got {}",
                tail
            )));
        }
        // Φ⁻¹(1 - p) = -Φ⁻¹(p); the lower branch keeps precision for tiny p
        Ok(-sigma * inverse_standard_normal_cdf(tail))
    }
}

/// Exact δ of N(0, σ²) noise on a query of sensitivity Δ at a given ε
pub fn privacy_loss_delta(sigma: f64, sensitivity: f64, epsilon: f64) -> f64 {
    let spread = sensitivity / (2.0 * sigma);
    let shift = epsilon * sigma / sensitivity;
    // e^ε·Φ(b) in log space: e^ε overflows long before Φ(b) underflows
    let tail = (epsilon + ln_standard_normal_cdf(-spread - shift)).exp();
    standard_normal_cdf(spread - shift) - tail
}

/// Φ(x), with full relative precision in the lower tail
pub fn standard_normal_cdf(x: f64) -> f64 {
    if x > 0.0 {
        1.0 - standard_normal_cdf(-x)
    } else {
        0.5 * erfc_non_negative(-x / SQRT_2)
    }
}

/// ln Φ(x), finite far below the point where Φ(x) underflows
fn ln_standard_normal_cdf(x: f64) -> f64 {
    if x >= -5.0 {
        return standard_normal_cdf(x).ln();
    }
    let z = -x / SQRT_2;
    -LN_2 - z * z - 0.5 * PI.ln() - erfc_continued_fraction(z).ln()
}

fn erfc_non_negative(z: f64) -> f64 {
    if z < ERFC_SERIES_LIMIT {
        1.0 - erf_series(z)
    } else {
        (-z * z).exp() / (PI.sqrt() * erfc_continued_fraction(z))
    }
}

/// erf(z) = 2/√π · e^(−z²) · Σ z·(2z²)ⁿ / (2n+1)!!
///
/// Every term is positive, so summing loses no precision.
fn erf_series(z: f64) -> f64 {
    let growth = 2.0 * z * z;
    let mut term = z;
    let mut sum = z;
    for n in 1..=500u32 {
        term *= growth / f64::from(2 * n + 1);
        sum += term;
        if term <= sum * f64::EPSILON {
            break;
        }
    }
    2.0 / PI.sqrt() * (-z * z).exp() * sum
}

/// K(z) in erfc(z) = e^(−z²) / (√π · K(z)), where
/// K(z) = z + (1/2)/(z + 1/(z + (3/2)/(z + ...)))
fn erfc_continued_fraction(z: f64) -> f64 {
    let mut fraction = z;
    for n in (1..=ERFC_FRACTION_DEPTH).rev() {
        fraction = z + (f64::from(n) / 2.0) / fraction;
    }
    fraction
}

/// Φ⁻¹(p) for p in (0, 1)
///
/// Acklam's rational approximation, relative error below 1.2e-9.
pub fn inverse_standard_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}
