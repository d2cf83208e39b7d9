//! Formal Differential Privacy (DP) Core
//!
//! Provides mathematically rigorous differential privacy primitives:
//! - Seedable ChaCha20 random number generation
//! - Laplace mechanism for (ε, 0)-DP
//! - Gaussian mechanism for (ε, δ)-DP
//! - Closed noise-kind dispatch with one-time calibration
//! - Privacy budget accounting under basic composition
//! - Input validation for DP parameters
//!
//! # Mathematical Guarantees
//!
//! For any two neighboring datasets D and D' (differing in the records of
//! one privacy identifier), and any output set S:
//!
//! P[M(D) ∈ S] ≤ e^ε · P[M(D') ∈ S] + δ
//!
//! # Example
//!
//! ```
//! use mycelix_dp_core::{BudgetAccountant, CalibratedNoise, NoiseKind, SecureRng};
//!
//! let mut budget = BudgetAccountant::new(1.0, 1e-6).unwrap();
//! let (epsilon, _delta) = budget.consume_budget(0.5, 0.0).unwrap();
//!
//! let rng = SecureRng::seeded(42);
//! let noise = CalibratedNoise::new(NoiseKind::Laplace, 1.0, epsilon, 0.0).unwrap();
//! let noisy_count = noise.add_noise(42.0, &rng).unwrap();
//! assert!(noisy_count.is_finite());
//! ```

pub mod budget;
pub mod gaussian;
pub mod laplace;
pub mod noise;
pub mod rng;
pub mod validation;

// Re-export commonly used items
pub use budget::{Allocation, BudgetAccountant, BudgetError, BudgetGrant};
pub use gaussian::GaussianMechanism;
pub use laplace::LaplaceMechanism;
pub use noise::{contribution_sensitivity, CalibratedNoise, NoiseError, NoiseKind};
pub use rng::{stream_rng, RngError, SecureRng};
pub use validation::{
    validate_delta, validate_delta_strict, validate_epsilon, validate_max_partitions_contributed,
    validate_max_value, validate_no_delta, validate_sensitivity, validate_value_bounds,
    DpValidationError,
};
