//! Noise Kind Dispatch
//!
//! Aggregations pick their mechanism once, at configuration time, as a
//! [`NoiseKind`]. [`CalibratedNoise`] then fixes the scale for a given
//! sensitivity and budget so every partition draws from the same
//! distribution.

use serde::{Deserialize, Serialize};

use super::gaussian::{GaussianError, GaussianMechanism};
use super::laplace::{LaplaceError, LaplaceMechanism};
use super::rng::SecureRng;

/// Closed set of supported noise mechanisms
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NoiseKind {
    /// (ε, 0)-DP, L1 calibration
    #[default]
    Laplace,
    /// (ε, δ)-DP, requires δ > 0
    Gaussian,
}

impl std::fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoiseKind::Laplace => write!(f, "Laplace"),
            NoiseKind::Gaussian => write!(f, "Gaussian"),
        }
    }
}

/// Error type for calibrated noise
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseError {
    Laplace(LaplaceError),
    Gaussian(GaussianError),
}

impl std::fmt::Display for NoiseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoiseError::Laplace(e) => write!(f, "Laplace mechanism: {}", e),
            NoiseError::Gaussian(e) => write!(f, "Gaussian mechanism: {}", e),
        }
    }
}

impl std::error::Error for NoiseError {}

impl From<LaplaceError> for NoiseError {
    fn from(e: LaplaceError) -> Self {
        NoiseError::Laplace(e)
    }
}

impl From<GaussianError> for NoiseError {
    fn from(e: GaussianError) -> Self {
        NoiseError::Gaussian(e)
    }
}

/// Sensitivity of a bounded sum: one identifier touches at most
/// `max_partitions` partitions and adds at most `max_magnitude` to each.
///
/// The same linear bound calibrates both mechanisms. For Gaussian noise it
/// over-approximates the L2 sensitivity √L·Linf.
pub fn contribution_sensitivity(max_partitions: i64, max_magnitude: f64) -> f64 {
    max_partitions as f64 * max_magnitude
}

/// A mechanism with its scale fixed for one aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedNoise {
    kind: NoiseKind,
    /// Laplace `b` or Gaussian `σ`
    scale: f64,
}

impl CalibratedNoise {
    /// Calibrate `kind` for `sensitivity` under (ε, δ)
    ///
    /// δ is ignored for Laplace noise and must be positive for Gaussian noise.
    pub fn new(
        kind: NoiseKind,
        sensitivity: f64,
        epsilon: f64,
        delta: f64,
    ) -> Result<Self, NoiseError> {
        let scale = match kind {
            NoiseKind::Laplace => LaplaceMechanism::compute_scale(sensitivity, epsilon)?,
            NoiseKind::Gaussian => GaussianMechanism::compute_sigma(sensitivity, epsilon, delta)?,
        };
        Ok(Self { kind, scale })
    }

    pub fn kind(&self) -> NoiseKind {
        self.kind
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Draw one zero-centred noise sample
    pub fn draw(&self, rng: &SecureRng) -> Result<f64, NoiseError> {
        Ok(match self.kind {
            NoiseKind::Laplace => LaplaceMechanism::sample(rng, self.scale)?,
            NoiseKind::Gaussian => GaussianMechanism::sample(rng, self.scale)?,
        })
    }

    pub fn add_noise(&self, value: f64, rng: &SecureRng) -> Result<f64, NoiseError> {
        Ok(value + self.draw(rng)?)
    }

    /// Smallest x such that a noise sample exceeds x with probability <= `tail`
    pub fn upper_tail_quantile(&self, tail: f64) -> Result<f64, NoiseError> {
        Ok(match self.kind {
            NoiseKind::Laplace => LaplaceMechanism::upper_tail_quantile(self.scale, tail)?,
            NoiseKind::Gaussian => GaussianMechanism::upper_tail_quantile(self.scale, tail)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kind_is_laplace() {
        assert_eq!(NoiseKind::default(), NoiseKind::Laplace);
    }

    #[test]
    fn test_sensitivity_is_linear() {
        assert_eq!(contribution_sensitivity(1, 10.0), 10.0);
        assert_eq!(contribution_sensitivity(3, 2.5), 7.5);
    }

    #[test]
    fn test_laplace_calibration_ignores_delta() {
        let noise = CalibratedNoise::new(NoiseKind::Laplace, 10.0, 0.5, 0.0).unwrap();
        assert!((noise.scale() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_calibration_needs_delta() {
        assert!(CalibratedNoise::new(NoiseKind::Gaussian, 1.0, 1.0, 0.0).is_err());
        let noise = CalibratedNoise::new(NoiseKind::Gaussian, 1.0, 1.0, 1e-5).unwrap();
        assert_eq!(noise.kind(), NoiseKind::Gaussian);
        assert!((noise.scale() - 3.7306).abs() < 1e-3);
    }

    #[test]
    fn test_draws_are_reproducible_with_seed() {
        let noise = CalibratedNoise::new(NoiseKind::Gaussian, 1.0, 1.0, 1e-5).unwrap();
        let a = SecureRng::seeded(5);
        let b = SecureRng::seeded(5);
        assert_eq!(noise.draw(&a).unwrap(), noise.draw(&b).unwrap());
    }
}
