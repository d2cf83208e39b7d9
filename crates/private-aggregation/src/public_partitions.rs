//! Public partitions
//!
//! When the caller knows the partition universe out-of-band, no selection
//! is needed: records outside the declared set are dropped before bounding,
//! every declared key receives a zero baseline, and the output covers the
//! declared set exactly.

use std::collections::BTreeSet;

use crate::combiner::Contribution;

/// Keep only records whose partition is declared
pub fn drop_non_public_partitions<Id, K: Ord, V>(
    records: Vec<(Id, (K, V))>,
    public_partitions: &BTreeSet<K>,
) -> Vec<(Id, (K, V))> {
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|(_, (key, _))| public_partitions.contains(key))
        .collect();
    tracing::debug!(
        dropped = before - kept.len(),
        public_partitions = public_partitions.len(),
        "records outside public partitions dropped"
    );
    kept
}

/// Append one zero placeholder per declared partition
pub fn add_public_partitions<K: Ord + Clone>(
    mut contributions: Vec<(K, Contribution)>,
    public_partitions: &BTreeSet<K>,
) -> Vec<(K, Contribution)> {
    contributions.extend(
        public_partitions
            .iter()
            .map(|key| (key.clone(), Contribution::Placeholder)),
    );
    contributions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_non_public_partitions() {
        let public: BTreeSet<&str> = ["a", "c"].into_iter().collect();
        let records = vec![(1, ("a", 1.0)), (2, ("b", 1.0)), (3, ("c", 2.0)), (4, ("d", 1.0))];
        let kept = drop_non_public_partitions(records, &public);
        assert_eq!(kept, vec![(1, ("a", 1.0)), (3, ("c", 2.0))]);
    }

    #[test]
    fn test_add_public_partitions() {
        let public: BTreeSet<&str> = ["a", "z"].into_iter().collect();
        let merged = add_public_partitions(vec![("a", Contribution::Bounded(2.0))], &public);
        assert_eq!(
            merged,
            vec![
                ("a", Contribution::Bounded(2.0)),
                ("a", Contribution::Placeholder),
                ("z", Contribution::Placeholder),
            ]
        );
    }
}
