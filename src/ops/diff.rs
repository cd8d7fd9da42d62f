//! Key-level diff between two committed versions

use crate::tree::ImmutableTree;
use crate::Result;
use bytes::Bytes;
use std::cmp::Ordering;

/// Type of change in a diff
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffEntry {
    /// Key was added
    Added { key: Bytes, value: Bytes },
    /// Key was removed
    Removed { key: Bytes, value: Bytes },
    /// Key was modified
    Modified {
        key: Bytes,
        old_value: Bytes,
        new_value: Bytes,
    },
}

impl DiffEntry {
    pub fn key(&self) -> &[u8] {
        match self {
            DiffEntry::Added { key, .. } => key,
            DiffEntry::Removed { key, .. } => key,
            DiffEntry::Modified { key, .. } => key,
        }
    }
}

/// Changes between two versions, in ascending key order
#[derive(Clone, Debug, Default)]
pub struct Diff {
    pub from: i64,
    pub to: i64,
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Added { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed { .. }))
            .count()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .count()
    }
}

/// Compute the changes that turn `old` into `new`.
///
/// Equal root hashes short-circuit to an empty diff; otherwise both trees
/// are walked in key order side by side.
pub fn diff_versions(old: &ImmutableTree, new: &ImmutableTree) -> Result<Diff> {
    let mut diff = Diff {
        from: old.version(),
        to: new.version(),
        entries: Vec::new(),
    };
    if old.root_hash() == new.root_hash() {
        return Ok(diff);
    }

    let mut old_iter = old.iter();
    let mut new_iter = new.iter();
    let mut old_next = old_iter.next().transpose()?;
    let mut new_next = new_iter.next().transpose()?;

    loop {
        let order = match (&old_next, &new_next) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((old_key, _)), Some((new_key, _))) => old_key.cmp(new_key),
        };
        match order {
            Ordering::Less => {
                if let Some((key, value)) = old_next.take() {
                    diff.entries.push(DiffEntry::Removed { key, value });
                }
                old_next = old_iter.next().transpose()?;
            }
            Ordering::Greater => {
                if let Some((key, value)) = new_next.take() {
                    diff.entries.push(DiffEntry::Added { key, value });
                }
                new_next = new_iter.next().transpose()?;
            }
            Ordering::Equal => {
                if let (Some((key, old_value)), Some((_, new_value))) =
                    (old_next.take(), new_next.take())
                {
                    if old_value != new_value {
                        diff.entries.push(DiffEntry::Modified {
                            key,
                            old_value,
                            new_value,
                        });
                    }
                }
                old_next = old_iter.next().transpose()?;
                new_next = new_iter.next().transpose()?;
            }
        }
    }
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MutableTree, TreeConfig};

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_diff_empty_to_non_empty() {
        let mut tree = MutableTree::in_memory(TreeConfig::default()).unwrap();
        tree.commit().unwrap();
        tree.set(b"a", b"1").unwrap();
        tree.commit().unwrap();

        let diff = tree.diff(1, 2).unwrap();
        assert_eq!(diff.added_count(), 1);
        assert_eq!(diff.removed_count(), 0);
        assert_eq!(diff.modified_count(), 0);
    }

    #[test]
    fn test_diff_changes() {
        let mut tree = MutableTree::in_memory(TreeConfig::default()).unwrap();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            tree.set(k.as_bytes(), v.as_bytes()).unwrap();
        }
        tree.commit().unwrap();
        tree.remove(b"a").unwrap();
        tree.set(b"b", b"20").unwrap();
        tree.set(b"d", b"4").unwrap();
        tree.commit().unwrap();

        let diff = tree.diff(1, 2).unwrap();
        assert_eq!(
            diff.entries,
            vec![
                DiffEntry::Removed { key: b("a"), value: b("1") },
                DiffEntry::Modified {
                    key: b("b"),
                    old_value: b("2"),
                    new_value: b("20"),
                },
                DiffEntry::Added { key: b("d"), value: b("4") },
            ]
        );

        let reverse = tree.diff(2, 1).unwrap();
        assert_eq!(reverse.added_count(), 1);
        assert_eq!(reverse.removed_count(), 1);
        assert_eq!(reverse.entries[0].key(), b"a");
    }

    #[test]
    fn test_diff_same_version_is_empty() {
        let mut tree = MutableTree::in_memory(TreeConfig::default()).unwrap();
        tree.set(b"a", b"1").unwrap();
        tree.commit().unwrap();
        assert!(tree.diff(1, 1).unwrap().is_empty());
    }
}
