//! Core diff engine implementation.
//! Compares two keyed count tables and ranks the changes.

use std::collections::HashMap;
use std::hash::Hash;

/// One key of the union of two tables, with its value on each side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry<K, V> {
    pub key: K,
    pub prev: Option<V>,
    pub next: Option<V>,
}

/// Compute the entries for every key present in either table
///
/// A key only in `next` has `prev = None`, and vice versa. Keys present on
/// both sides are reported even when their values are equal.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use clr_census::diff::diff;
///
/// let prev = HashMap::from([("a", 1u64)]);
/// let next = HashMap::from([("b", 2u64)]);
/// assert_eq!(diff(&prev, &next).len(), 2);
/// ```
pub fn diff<K, V>(prev: &HashMap<K, V>, next: &HashMap<K, V>) -> Vec<DiffEntry<K, V>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let removed_or_kept = prev.iter().map(|(key, value)| DiffEntry {
        key: key.clone(),
        prev: Some(value.clone()),
        next: next.get(key).cloned(),
    });

    let added = next
        .iter()
        .filter(|(key, _)| !prev.contains_key(*key))
        .map(|(key, value)| DiffEntry {
            key: key.clone(),
            prev: None,
            next: Some(value.clone()),
        });

    removed_or_kept.chain(added).collect()
}

/// A changed count between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<K> {
    pub key: K,
    pub prev: u64,
    pub next: u64,
}

impl<K> Change<K> {
    /// Signed change, next minus previous
    pub fn delta(&self) -> i64 {
        self.next as i64 - self.prev as i64
    }

    pub fn magnitude(&self) -> u64 {
        self.next.abs_diff(self.prev)
    }
}

/// Keep non-zero changes, largest magnitude first
///
/// `limit == 0` keeps every change; otherwise the list is truncated to
/// `limit` entries. Equal magnitudes are ordered by key so the ranking is
/// stable across runs.
pub fn rank_changes<K: Ord>(entries: Vec<DiffEntry<K, u64>>, limit: usize) -> Vec<Change<K>> {
    let mut changes: Vec<Change<K>> = entries
        .into_iter()
        .map(|e| Change {
            key: e.key,
            prev: e.prev.unwrap_or(0),
            next: e.next.unwrap_or(0),
        })
        .filter(|c| c.magnitude() > 0)
        .collect();

    changes.sort_by(|a, b| b.magnitude().cmp(&a.magnitude()).then_with(|| a.key.cmp(&b.key)));

    if limit > 0 {
        changes.truncate(limit);
    }
    changes
}
