//! Execution seam
//!
//! The aggregation stages only need three primitives from whatever engine
//! runs them: group-by-key, combine-per-key and a per-element flat map.
//! [`Executor`] names those primitives; [`LocalExecutor`] runs them on one
//! thread and, with the `parallel` feature, [`ParallelExecutor`] runs them on
//! the rayon pool. Stage code never depends on which one it gets.
//!
//! Group order inside [`Executor::group_by_key`] is unspecified, so stages
//! that care about order sort first.

use std::collections::BTreeMap;

/// Associative, commutative per-key aggregation
///
/// Executors may build several partial accumulators for one key and merge
/// them in any order.
pub trait CombineFn: Sync {
    type Input: Send;
    type Accumulator: Send;
    type Output: Send;

    fn create_accumulator(&self) -> Self::Accumulator;

    fn add_input(&self, accumulator: &mut Self::Accumulator, input: Self::Input);

    fn merge_accumulators(
        &self,
        a: Self::Accumulator,
        b: Self::Accumulator,
    ) -> Self::Accumulator;

    fn extract_output(&self, accumulator: Self::Accumulator) -> Self::Output;
}

/// Group-by / combine substrate
pub trait Executor: Sync {
    /// Collect all values per key; output is ordered by key
    fn group_by_key<K, V>(&self, input: Vec<(K, V)>) -> Vec<(K, Vec<V>)>
    where
        K: Ord + Send,
        V: Send;

    /// Fold each key's values with `combine_fn`; output is ordered by key
    fn combine_per_key<K, F>(
        &self,
        input: Vec<(K, F::Input)>,
        combine_fn: &F,
    ) -> Vec<(K, F::Output)>
    where
        K: Ord + Send,
        F: CombineFn;

    /// Apply `f` to every element and concatenate the results in input order
    fn flat_map<T, U, F>(&self, input: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> Vec<U> + Sync + Send;
}

/// Single-threaded executor
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl Executor for LocalExecutor {
    fn group_by_key<K, V>(&self, input: Vec<(K, V)>) -> Vec<(K, Vec<V>)>
    where
        K: Ord + Send,
        V: Send,
    {
        let mut groups: BTreeMap<K, Vec<V>> = BTreeMap::new();
        for (key, value) in input {
            groups.entry(key).or_default().push(value);
        }
        groups.into_iter().collect()
    }

    fn combine_per_key<K, F>(
        &self,
        input: Vec<(K, F::Input)>,
        combine_fn: &F,
    ) -> Vec<(K, F::Output)>
    where
        K: Ord + Send,
        F: CombineFn,
    {
        let mut accumulators: BTreeMap<K, F::Accumulator> = BTreeMap::new();
        for (key, value) in input {
            let accumulator = accumulators
                .entry(key)
                .or_insert_with(|| combine_fn.create_accumulator());
            combine_fn.add_input(accumulator, value);
        }
        accumulators
            .into_iter()
            .map(|(key, accumulator)| (key, combine_fn.extract_output(accumulator)))
            .collect()
    }

    fn flat_map<T, U, F>(&self, input: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> Vec<U> + Sync + Send,
    {
        input.into_iter().flat_map(f).collect()
    }
}

#[cfg(feature = "parallel")]
pub use parallel::ParallelExecutor;

#[cfg(feature = "parallel")]
mod parallel {
    use std::collections::BTreeMap;

    use rayon::prelude::*;

    use super::{CombineFn, Executor};

    /// Rayon executor: per-worker partial accumulators, merged pairwise
    ///
    /// Outputs match [`super::LocalExecutor`] up to the order in which noise
    /// is drawn, so seeded runs are only reproducible on the local executor.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ParallelExecutor;

    impl Executor for ParallelExecutor {
        fn group_by_key<K, V>(&self, input: Vec<(K, V)>) -> Vec<(K, Vec<V>)>
        where
            K: Ord + Send,
            V: Send,
        {
            let groups = input
                .into_par_iter()
                .fold(BTreeMap::new, |mut groups: BTreeMap<K, Vec<V>>, (key, value)| {
                    groups.entry(key).or_default().push(value);
                    groups
                })
                .reduce(BTreeMap::new, |mut left, right| {
                    for (key, mut values) in right {
                        left.entry(key).or_default().append(&mut values);
                    }
                    left
                });
            groups.into_iter().collect()
        }

        fn combine_per_key<K, F>(
            &self,
            input: Vec<(K, F::Input)>,
            combine_fn: &F,
        ) -> Vec<(K, F::Output)>
        where
            K: Ord + Send,
            F: CombineFn,
        {
            let accumulators = input
                .into_par_iter()
                .fold(
                    BTreeMap::new,
                    |mut partial: BTreeMap<K, F::Accumulator>, (key, value)| {
                        let accumulator = partial
                            .entry(key)
                            .or_insert_with(|| combine_fn.create_accumulator());
                        combine_fn.add_input(accumulator, value);
                        partial
                    },
                )
                .reduce(BTreeMap::new, |mut left, right| {
                    for (key, accumulator) in right {
                        let merged = match left.remove(&key) {
                            Some(existing) => combine_fn.merge_accumulators(existing, accumulator),
                            None => accumulator,
                        };
                        left.insert(key, merged);
                    }
                    left
                });

            accumulators
                .into_iter()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|(key, accumulator)| (key, combine_fn.extract_output(accumulator)))
                .collect()
        }

        fn flat_map<T, U, F>(&self, input: Vec<T>, f: F) -> Vec<U>
        where
            T: Send,
            U: Send,
            F: Fn(T) -> Vec<U> + Sync + Send,
        {
            input.into_par_iter().flat_map_iter(f).collect()
        }
    }
}

/// Plain f64 sum, used to pre-aggregate an identifier's repeated records
#[derive(Debug, Clone, Copy, Default)]
pub struct SumFn;

impl CombineFn for SumFn {
    type Input = f64;
    type Accumulator = f64;
    type Output = f64;

    fn create_accumulator(&self) -> f64 {
        0.0
    }

    fn add_input(&self, accumulator: &mut f64, input: f64) {
        *accumulator += input;
    }

    fn merge_accumulators(&self, a: f64, b: f64) -> f64 {
        a + b
    }

    fn extract_output(&self, accumulator: f64) -> f64 {
        accumulator
    }
}
