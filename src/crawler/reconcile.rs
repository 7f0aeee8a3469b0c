//! Baseline reconciliation for discovered entities

use std::collections::BTreeSet;

/// Difference between a stored baseline and a fresh observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<K: Ord> {
    /// Observed now, absent from the baseline
    pub new: BTreeSet<K>,
    /// In the baseline, not observed now; kept for history but not re-crawled
    pub removed: BTreeSet<K>,
    pub unchanged: BTreeSet<K>,
}

impl<K: Ord> Delta<K> {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.removed.is_empty()
    }
}

/// Classifies every key of `previous ∪ fresh`
///
/// An empty baseline makes everything new.
pub fn reconcile<K: Ord + Clone>(previous: &BTreeSet<K>, fresh: &BTreeSet<K>) -> Delta<K> {
    Delta {
        new: fresh.difference(previous).cloned().collect(),
        removed: previous.difference(fresh).cloned().collect(),
        unchanged: fresh.intersection(previous).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&'static str]) -> BTreeSet<&'static str> {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_fresh_discovery() {
        let delta = reconcile(&set(&[]), &set(&["A", "B", "C"]));
        assert_eq!(delta.new, set(&["A", "B", "C"]));
        assert!(delta.removed.is_empty());
        assert!(delta.unchanged.is_empty());
    }

    #[test]
    fn test_incremental_discovery() {
        let delta = reconcile(&set(&["A", "B", "C"]), &set(&["A", "B", "D"]));
        assert_eq!(delta.new, set(&["D"]));
        assert_eq!(delta.removed, set(&["C"]));
        assert_eq!(delta.unchanged, set(&["A", "B"]));
        assert!(delta.has_changes());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let baselines = [set(&[]), set(&["A"]), set(&["A", "B", "C", "D"])];
        for baseline in &baselines {
            let delta = reconcile(baseline, baseline);
            assert!(delta.new.is_empty());
            assert!(delta.removed.is_empty());
            assert_eq!(&delta.unchanged, baseline);
            assert!(!delta.has_changes());
        }
    }

    #[test]
    fn test_everything_removed() {
        let delta = reconcile(&set(&["A", "B"]), &set(&[]));
        assert_eq!(delta.removed, set(&["A", "B"]));
        assert!(delta.new.is_empty());
    }

    #[test]
    fn test_numeric_keys() {
        let previous: BTreeSet<u32> = [101, 102, 103].into_iter().collect();
        let fresh: BTreeSet<u32> = [102, 103, 104].into_iter().collect();
        let delta = reconcile(&previous, &fresh);
        assert_eq!(delta.new.into_iter().collect::<Vec<_>>(), vec![104]);
        assert_eq!(delta.removed.into_iter().collect::<Vec<_>>(), vec![101]);
    }
}
