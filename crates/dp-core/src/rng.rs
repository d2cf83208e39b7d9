//! Cryptographically Secure Random Number Generation
//!
//! Provides the CSPRNG used by every noise mechanism and by contribution
//! bounding. A [`SecureRng`] wraps a ChaCha20 stream cipher generator:
//!
//! - seeded from OS entropy (`getrandom`) for production aggregations
//! - seeded from an explicit `u64` for reproducible tests
//!
//! # Mutex Behavior
//!
//! The generator sits behind a `Mutex` so a single instance can be shared by
//! the workers of a parallel combine. A poisoned mutex fails closed with
//! [`RngError::Unavailable`]: an aggregation must never continue with a
//! generator whose state may have been left half-updated.

use std::sync::Mutex;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

/// Error type for RNG operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RngError {
    /// Failed to read OS entropy
    EntropyError(String),
    /// Generator lock was poisoned by a panicking thread
    Unavailable,
}

impl std::fmt::Display for RngError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RngError::EntropyError(msg) => write!(f, "Entropy error: {}", msg),
            RngError::Unavailable => write!(f, "Random generator unavailable (poisoned lock)"),
        }
    }
}

impl std::error::Error for RngError {}

/// Shared ChaCha20 generator for noise and sampling
#[derive(Debug)]
pub struct SecureRng {
    inner: Mutex<ChaCha20Rng>,
}

impl SecureRng {
    /// Create a generator keyed from OS entropy
    ///
    /// # Returns
    /// * `Ok(SecureRng)` on success
    /// * `Err(RngError::EntropyError)` if the entropy source fails
    pub fn from_entropy() -> Result<Self, RngError> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed)
            .map_err(|e| RngError::EntropyError(format!("Failed to get entropy: {:?}", e)))?;
        Ok(Self {
            inner: Mutex::new(ChaCha20Rng::from_seed(seed)),
        })
    }

    /// Create a deterministic generator for tests and reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    /// Seeded when `seed` is given, OS entropy otherwise
    pub fn from_optional_seed(seed: Option<u64>) -> Result<Self, RngError> {
        match seed {
            Some(s) => Ok(Self::seeded(s)),
            None => Self::from_entropy(),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha20Rng) -> T) -> Result<T, RngError> {
        let mut rng = self.inner.lock().map_err(|_| RngError::Unavailable)?;
        Ok(f(&mut rng))
    }

    /// Generate a random u64
    pub fn random_u64(&self) -> Result<u64, RngError> {
        self.with_rng(|rng| rng.gen::<u64>())
    }

    /// Generate a random f64 uniformly distributed in [0, 1)
    ///
    /// Uses 53 random bits (the mantissa precision of f64) divided by 2^53.
    pub fn random_f64_uniform(&self) -> Result<f64, RngError> {
        let value = self.random_u64()?;
        Ok(bits_to_unit(value))
    }

    /// Generate a random f64 uniformly distributed in (-0.5, 0.5), excluding 0
    ///
    /// This is the input range of the Laplace inverse CDF.
    pub fn random_f64_centered(&self) -> Result<f64, RngError> {
        loop {
            let centered = self.random_f64_uniform()? - 0.5;
            if centered.abs() > 1e-15 {
                return Ok(centered);
            }
        }
    }

    /// Two independent uniforms in (0, 1] for the Box-Muller transform
    pub fn random_pair_for_box_muller(&self) -> Result<(f64, f64), RngError> {
        let (v1, v2) = self.with_rng(|rng| (rng.gen::<u64>(), rng.gen::<u64>()))?;

        // ln(u1) must stay finite
        let u1 = bits_to_unit(v1).max(1e-15);
        let u2 = bits_to_unit(v2).max(1e-15);

        Ok((u1, u2))
    }
}

fn bits_to_unit(value: u64) -> f64 {
    (value >> 11) as f64 / (1u64 << 53) as f64
}

/// Independent, reproducible generator for one logical stream
///
/// Streams derived from the same `seed` with different `stream` ids never
/// overlap, so per-key sampling does not depend on the order in which keys
/// are visited.
pub fn stream_rng(seed: u64, stream: u64) -> ChaCha20Rng {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_entropy_generators_differ() {
        let a = SecureRng::from_entropy().unwrap();
        let b = SecureRng::from_entropy().unwrap();
        assert_ne!(a.random_u64().unwrap(), b.random_u64().unwrap());
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = SecureRng::seeded(7);
        let b = SecureRng::seeded(7);
        for _ in 0..16 {
            assert_eq!(a.random_u64().unwrap(), b.random_u64().unwrap());
        }
    }

    #[test]
    fn test_optional_seed() {
        let seeded = SecureRng::from_optional_seed(Some(7)).unwrap();
        assert_eq!(
            seeded.random_u64().unwrap(),
            SecureRng::seeded(7).random_u64().unwrap()
        );

        let a = SecureRng::from_optional_seed(None).unwrap();
        let b = SecureRng::from_optional_seed(None).unwrap();
        assert_ne!(a.random_u64().unwrap(), b.random_u64().unwrap());
    }

    #[test]
    fn test_random_f64_uniform_range() {
        let rng = SecureRng::seeded(1);
        for _ in 0..1000 {
            let value = rng.random_f64_uniform().unwrap();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn test_random_f64_centered_range() {
        let rng = SecureRng::seeded(2);
        for _ in 0..1000 {
            let value = rng.random_f64_centered().unwrap();
            assert!(value > -0.5 && value < 0.5);
            assert!(value.abs() > 1e-15);
        }
    }

    #[test]
    fn test_random_pair_positive() {
        let rng = SecureRng::seeded(3);
        for _ in 0..1000 {
            let (u1, u2) = rng.random_pair_for_box_muller().unwrap();
            assert!(u1 > 0.0 && u1 <= 1.0);
            assert!(u2 > 0.0 && u2 <= 1.0);
        }
    }

    #[test]
    fn test_streams_are_independent() {
        let mut s0 = stream_rng(42, 0);
        let mut s1 = stream_rng(42, 1);
        let mut s0_again = stream_rng(42, 0);

        let a = s0.next_u64();
        assert_ne!(a, s1.next_u64());
        assert_eq!(a, s0_again.next_u64());
    }
}
