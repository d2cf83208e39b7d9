use std::sync::Arc;

use crate::privacy_spec::PrivacySpec;

/// Records keyed by privacy identifier, bound to the spec that pays for them
///
/// `T` is the partition key for counting operations and `(key, value)` for
/// sums. Identifiers never leave the collection: every aggregation drops
/// them before producing output.
#[derive(Debug, Clone)]
pub struct PrivateCollection<Id, T> {
    records: Vec<(Id, T)>,
    spec: Arc<PrivacySpec>,
}

impl<Id, T> PrivateCollection<Id, T> {
    pub fn new(records: impl IntoIterator<Item = (Id, T)>, spec: Arc<PrivacySpec>) -> Self {
        Self {
            records: records.into_iter().collect(),
            spec,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn spec(&self) -> &Arc<PrivacySpec> {
        &self.spec
    }

    pub(crate) fn records(&self) -> &[(Id, T)] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_shares_spec() {
        let spec = Arc::new(PrivacySpec::new(1.0, 1e-5).unwrap());
        let visits = PrivateCollection::new(vec![(1u32, "a"), (2, "b")], Arc::clone(&spec));
        let purchases: PrivateCollection<u32, (&str, f64)> =
            PrivateCollection::new(Vec::new(), Arc::clone(&spec));

        assert_eq!(visits.len(), 2);
        assert!(purchases.is_empty());
        assert!(Arc::ptr_eq(visits.spec(), purchases.spec()));
    }
}
