//! Noised bounded combiner
//!
//! Sums the bounded contributions of each partition, runs partition
//! selection on the number of contributing identifiers when no public list
//! was given, and adds noise calibrated to the cross-partition and value
//! bounds. Output clamping to zero happens strictly after noise.

use mycelix_dp_core::{CalibratedNoise, NoiseKind, SecureRng};

use crate::error::Result;
use crate::pipeline::CombineFn;
use crate::selection::PartitionSelector;

/// One input row of the combiner
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    /// One identifier's clamped total for the partition
    Bounded(f64),
    /// Zero baseline for a declared public partition; not an identifier
    Placeholder,
}

/// How one aggregation's (ε, δ) is divided between noise and selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSplit {
    pub noise_epsilon: f64,
    pub noise_delta: f64,
    pub selection_epsilon: f64,
    pub selection_delta: f64,
}

impl BudgetSplit {
    /// With public partitions the noise gets everything. Otherwise ε is
    /// halved; δ goes to selection, except that Gaussian noise keeps half.
    ///
    /// Gaussian noisy-threshold selection halves its share again between
    /// its own noise and the threshold tail, so that tail sees δ/4.
    pub fn new(kind: NoiseKind, epsilon: f64, delta: f64, public_partitions: bool) -> Self {
        if public_partitions {
            return Self {
                noise_epsilon: epsilon,
                noise_delta: delta,
                selection_epsilon: 0.0,
                selection_delta: 0.0,
            };
        }
        let noise_delta = match kind {
            NoiseKind::Laplace => 0.0,
            NoiseKind::Gaussian => delta / 2.0,
        };
        Self {
            noise_epsilon: epsilon / 2.0,
            noise_delta,
            selection_epsilon: epsilon / 2.0,
            selection_delta: delta - noise_delta,
        }
    }
}

/// Post-noise clamp into the valid output range
pub fn clamp_non_negative(value: f64) -> f64 {
    value.max(0.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundedSumAccumulator {
    pub sum: f64,
    /// Distinct identifiers that reached this partition after bounding
    pub contributors: i64,
}

/// Per-partition sum, selection, noise and non-negative clamp
///
/// `extract_output` yields `Ok(None)` for a suppressed partition.
#[derive(Debug)]
pub struct BoundedSumFn<'a> {
    noise: CalibratedNoise,
    selector: Option<PartitionSelector>,
    rng: &'a SecureRng,
}

impl<'a> BoundedSumFn<'a> {
    pub fn new(
        noise: CalibratedNoise,
        selector: Option<PartitionSelector>,
        rng: &'a SecureRng,
    ) -> Self {
        Self {
            noise,
            selector,
            rng,
        }
    }
}

impl CombineFn for BoundedSumFn<'_> {
    type Input = Contribution;
    type Accumulator = BoundedSumAccumulator;
    type Output = Result<Option<f64>>;

    fn create_accumulator(&self) -> BoundedSumAccumulator {
        BoundedSumAccumulator::default()
    }

    fn add_input(&self, accumulator: &mut BoundedSumAccumulator, input: Contribution) {
        if let Contribution::Bounded(value) = input {
            accumulator.sum += value;
            accumulator.contributors += 1;
        }
    }

    fn merge_accumulators(
        &self,
        a: BoundedSumAccumulator,
        b: BoundedSumAccumulator,
    ) -> BoundedSumAccumulator {
        BoundedSumAccumulator {
            sum: a.sum + b.sum,
            contributors: a.contributors + b.contributors,
        }
    }

    fn extract_output(&self, accumulator: BoundedSumAccumulator) -> Result<Option<f64>> {
        if let Some(selector) = &self.selector {
            if !selector.should_keep(accumulator.contributors, self.rng)? {
                return Ok(None);
            }
        }
        let noisy = self.noise.add_noise(accumulator.sum, self.rng)?;
        Ok(Some(clamp_non_negative(noisy)))
    }
}

/// Selection without a value: counts contributors and keeps or drops
#[derive(Debug)]
pub struct SelectPartitionFn<'a> {
    selector: PartitionSelector,
    rng: &'a SecureRng,
}

impl<'a> SelectPartitionFn<'a> {
    pub fn new(selector: PartitionSelector, rng: &'a SecureRng) -> Self {
        Self { selector, rng }
    }
}

impl CombineFn for SelectPartitionFn<'_> {
    type Input = ();
    type Accumulator = i64;
    type Output = Result<bool>;

    fn create_accumulator(&self) -> i64 {
        0
    }

    fn add_input(&self, accumulator: &mut i64, _input: ()) {
        *accumulator += 1;
    }

    fn merge_accumulators(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn extract_output(&self, accumulator: i64) -> Result<bool> {
        self.selector.should_keep(accumulator, self.rng)
    }
}
