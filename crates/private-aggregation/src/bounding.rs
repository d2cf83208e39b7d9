//! Contribution bounding
//!
//! Limits what one privacy identifier can do to the output:
//!
//! 1. **Cross-partition**: an identifier appearing in more than
//!    `max_partitions` partitions keeps a uniform random subset of exactly
//!    `max_partitions` of them. The rest of its records are dropped.
//! 2. **Per-partition**: an identifier's records in one partition are summed
//!    first, then clamped to the declared [`ValueBounds`].
//!
//! The subset is drawn from a ChaCha20 stream keyed by the aggregation seed
//! and a SHA-256 hash of the identifier, after sorting the identifier's
//! partitions. The sample therefore depends only on the seed and the
//! identifier's own data, never on arrival order, worker scheduling,
//! platform or toolchain.

use std::hash::{Hash, Hasher};

use mycelix_dp_core::stream_rng;
use rand::seq::index;
use sha2::{Digest, Sha256};

use crate::pipeline::{Executor, SumFn};

/// Clamping interval for one identifier's total in one partition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ValueBounds {
    /// Bounds must already be validated: finite, `lower <= upper`
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Clamp into `[lower, upper]`. NaN maps to `lower`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.lower;
        }
        value.clamp(self.lower, self.upper)
    }

    /// Largest magnitude a clamped contribution can have
    pub fn max_magnitude(&self) -> f64 {
        self.lower.abs().max(self.upper.abs())
    }
}

/// What contribution bounding removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingStats {
    /// Distinct identifiers in the input
    pub identifiers: usize,
    /// Identifiers that lost partitions to the cross-partition bound
    pub identifiers_truncated: usize,
    /// (identifier, partition) pairs dropped by the cross-partition bound
    pub contributions_dropped: usize,
    /// (identifier, partition) pairs that survived
    pub contributions_kept: usize,
}

/// Seeded uniform sampler for the cross-partition bound
#[derive(Debug, Clone, Copy)]
pub struct CrossPartitionBounder {
    max_partitions: usize,
    seed: u64,
}

impl CrossPartitionBounder {
    /// `max_partitions` must already be validated positive
    pub fn new(max_partitions: i64, seed: u64) -> Self {
        Self {
            max_partitions: usize::try_from(max_partitions).unwrap_or(usize::MAX),
            seed,
        }
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    /// Keep at most `max_partitions` of one identifier's partitions
    ///
    /// `partitions` holds one entry per distinct key. Which entries survive
    /// is decided by `stream` (the identifier's hash) and the seed alone.
    pub fn bound_identifier<K: Ord, V>(
        &self,
        stream: u64,
        mut partitions: Vec<(K, V)>,
    ) -> Vec<(K, V)> {
        if partitions.len() <= self.max_partitions {
            return partitions;
        }
        partitions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rng = stream_rng(self.seed, stream);
        let mut keep = vec![false; partitions.len()];
        for i in index::sample(&mut rng, partitions.len(), self.max_partitions).iter() {
            keep[i] = true;
        }
        partitions
            .into_iter()
            .zip(keep)
            .filter_map(|(partition, kept)| kept.then_some(partition))
            .collect()
    }
}

/// Stable 64-bit stream id for an identifier: the first 8 bytes of the
/// SHA-256 digest of its `Hash` encoding, read little-endian
pub fn identifier_stream<Id: Hash>(id: &Id) -> u64 {
    let mut hasher = StreamHasher::default();
    id.hash(&mut hasher);
    hasher.finish()
}

/// `Hasher` over SHA-256
///
/// Integers are written little-endian and `usize`/`isize` as 64 bits, so
/// the digest does not depend on the host.
#[derive(Clone, Default)]
struct StreamHasher(Sha256);

impl Hasher for StreamHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    fn write_u128(&mut self, i: u128) {
        self.write(&i.to_le_bytes());
    }

    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn write_i16(&mut self, i: i16) {
        self.write_u16(i as u16);
    }

    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32);
    }

    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64);
    }

    fn write_i128(&mut self, i: i128) {
        self.write_u128(i as u128);
    }

    fn write_isize(&mut self, i: isize) {
        self.write_u64(i as u64);
    }

    fn finish(&self) -> u64 {
        let digest = self.0.clone().finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }
}

/// Apply both bounds and drop identifiers
///
/// Returns one `(partition, clamped total)` entry per surviving
/// (identifier, partition) pair.
pub fn bound_contributions<Id, K, E>(
    executor: &E,
    records: Vec<(Id, (K, f64))>,
    bounder: &CrossPartitionBounder,
    bounds: ValueBounds,
) -> (Vec<(K, f64)>, BoundingStats)
where
    Id: Ord + Hash + Send,
    K: Ord + Send,
    E: Executor,
{
    let keyed = records
        .into_iter()
        .map(|(id, (key, value))| ((id, key), value))
        .collect();
    let totals = executor.combine_per_key(keyed, &SumFn);
    let per_identifier = executor.group_by_key(
        totals
            .into_iter()
            .map(|((id, key), total)| (id, (key, total)))
            .collect(),
    );

    let limit = bounder.max_partitions();
    let mut stats = BoundingStats {
        identifiers: per_identifier.len(),
        ..BoundingStats::default()
    };
    for (_, partitions) in &per_identifier {
        if partitions.len() > limit {
            stats.identifiers_truncated += 1;
            stats.contributions_dropped += partitions.len() - limit;
        }
    }

    let bounded = executor.flat_map(per_identifier, |(id, partitions)| {
        bounder
            .bound_identifier(identifier_stream(&id), partitions)
            .into_iter()
            .map(|(key, total)| (key, bounds.clamp(total)))
            .collect::<Vec<_>>()
    });
    stats.contributions_kept = bounded.len();

    tracing::debug!(
        identifiers = stats.identifiers,
        identifiers_truncated = stats.identifiers_truncated,
        contributions_dropped = stats.contributions_dropped,
        contributions_kept = stats.contributions_kept,
        "contribution bounding applied"
    );
    (bounded, stats)
}


#[cfg(test)]
mod proptest_tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::pipeline::LocalExecutor;

    proptest! {
        /// No identifier reaches more than max_partitions partitions, and
        /// every kept value lies in the bounds
        #[test]
        fn prop_both_bounds_hold(
            records in prop::collection::vec((0u8..20, 0u8..15, -50.0f64..50.0), 0..300),
            max_partitions in 1i64..5,
            upper in 0.5f64..20.0,
            seed in any::<u64>(),
        ) {
            let bounder = CrossPartitionBounder::new(max_partitions, seed);
            let bounds = ValueBounds::new(0.0, upper);

            // Bound each identifier separately to keep the id in view
            let mut by_id: BTreeMap<u8, Vec<(u8, (u8, f64))>> = BTreeMap::new();
            for (id, key, value) in records {
                by_id.entry(id).or_default().push((id, (key, value)));
            }
            for (_, records) in by_id {
                let (bounded, _) = bound_contributions(&LocalExecutor, records, &bounder, bounds);
                prop_assert!(bounded.len() <= max_partitions as usize);
                for (_, value) in bounded {
                    prop_assert!((0.0..=upper).contains(&value));
                }
            }
        }
    }
}
