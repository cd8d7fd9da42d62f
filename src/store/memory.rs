//! In-memory store: an ordered arena of encoded entries

use super::{Batch, BatchOp, KvStore};
use crate::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A [`KvStore`] held entirely in memory
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, batch: Batch) -> Result<()> {
        // a single write guard makes the batch atomic for readers
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemStore::new();
        let mut batch = Batch::new();
        batch.set(b"a".to_vec(), b"1".to_vec());
        batch.set(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_scan_prefix() {
        let store = MemStore::new();
        let mut batch = Batch::new();
        for key in [&b"n1"[..], b"n2", b"o1", b"m9"] {
            batch.set(key.to_vec(), key.to_vec());
        }
        store.write(batch).unwrap();

        let keys: Vec<_> = store
            .scan_prefix(b"n")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"n1".to_vec(), b"n2".to_vec()]);
    }
}
