//! Differentially Private Per-Partition Aggregation
//!
//! Counts and sums over per-identifier records, published so that no single
//! privacy identifier can be inferred from the output beyond the configured
//! (ε, δ).
//!
//! # Pipeline
//!
//! ```text
//! records ─► contribution bounding ─┬─► partition selection ──┐
//!            (cross-partition,      │                         ├─► noised combiner ─► clamp ─► output
//!             per-partition clamp)  └─► public partitions ────┘
//! ```
//!
//! - [`PrivacySpec`]: total budget of a dataset, shared by all of its
//!   aggregations. Each call deducts its (ε, δ) once, before touching data.
//! - [`bounding`]: at most `max_partitions_contributed` partitions per
//!   identifier, chosen by a seeded uniform sample; per-partition totals
//!   clamped to the value bounds.
//! - [`selection`]: without public partitions, keeps only partitions with
//!   enough distinct identifiers after noise.
//! - [`public_partitions`]: with a declared partition list, outputs exactly
//!   that list and skips selection.
//! - [`combiner`]: sums, noises and clamps each partition.
//!
//! The grouping substrate is abstracted by [`Executor`]; [`LocalExecutor`]
//! is the default and the `parallel` feature adds a rayon executor.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use mycelix_private_aggregation::{
//!     sum_per_key, NoiseKind, PrivacySpec, PrivateCollection, SumParams,
//! };
//!
//! let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap());
//! let spend = PrivateCollection::new(
//!     vec![("alice", ("books", 12.0)), ("bob", ("books", 30.0)), ("bob", ("games", 5.0))],
//!     Arc::clone(&spec),
//! );
//!
//! let public: BTreeSet<&str> = ["books", "games", "music"].into_iter().collect();
//! let sums = sum_per_key(
//!     &spend,
//!     SumParams {
//!         noise_kind: Some(NoiseKind::Gaussian),
//!         epsilon: 0.5,
//!         delta: 1e-6,
//!         max_partitions_contributed: Some(2),
//!         min_value: 0.0,
//!         max_value: 20.0,
//!         public_partitions: Some(public),
//!         ..SumParams::default()
//!     },
//! )
//! .unwrap();
//!
//! assert_eq!(sums.len(), 3);
//! assert!(sums.iter().all(|(_, s)| *s >= 0.0));
//! ```

mod aggregation;
pub mod bounding;
mod collection;
pub mod combiner;
mod count;
mod distinct;
pub mod error;
pub mod pipeline;
mod privacy_spec;
pub mod public_partitions;
pub mod selection;
mod sum;

pub use collection::PrivateCollection;
pub use count::{count, count_with, CountParams};
pub use distinct::{
    distinct_privacy_id, distinct_privacy_id_with, select_partitions, select_partitions_with,
    DistinctPrivacyIdParams, SelectPartitionsParams,
};
pub use error::{AggregationError, Result};
pub use pipeline::{CombineFn, Executor, LocalExecutor};
pub use privacy_spec::{PrivacySpec, PrivacySpecConfig};
pub use selection::PartitionSelectionStrategy;
pub use sum::{sum_per_key, sum_per_key_with, SumParams};

#[cfg(feature = "parallel")]
pub use pipeline::ParallelExecutor;

pub use mycelix_dp_core::{BudgetAccountant, NoiseKind};
