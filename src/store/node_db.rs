//! Node database: the tree's layout on top of a [`KvStore`]
//!
//! Key layout:
//! - `n ‖ version (u64 BE) ‖ nonce (u32 BE)` → node storage encoding
//! - `r ‖ version (u64 BE)` → encoded root NodeKey, empty for an empty tree
//! - `o ‖ version (u64 BE)` → bincode list of NodeKeys orphaned by that version
//!
//! Big-endian fixed-width keys keep entries ordered by version.

use super::{Batch, KvStore, NodeCache};
use crate::model::NodeKey;
use crate::tree::{Child, Node};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const NODE_PREFIX: u8 = b'n';
const ROOT_PREFIX: u8 = b'r';
const ORPHAN_PREFIX: u8 = b'o';

fn node_store_key(key: &NodeKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.push(NODE_PREFIX);
    out.extend_from_slice(&key.version().to_be_bytes());
    out.extend_from_slice(&key.nonce().to_be_bytes());
    out
}

fn version_store_key(prefix: u8, version: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(prefix);
    out.extend_from_slice(&version.to_be_bytes());
    out
}

fn version_from_store_key(key: &[u8]) -> Result<i64> {
    key.get(1..9)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_be_bytes)
        .ok_or_else(|| Error::InvalidFile(format!("bad version key {}", hex::encode(key))))
}

/// Handle to the backing store shared by every tree view
#[derive(Clone)]
pub struct NodeDb {
    store: Arc<dyn KvStore>,
    cache: Arc<NodeCache>,
}

impl NodeDb {
    pub fn new(store: Arc<dyn KvStore>, cache_size: usize) -> Self {
        NodeDb {
            store,
            cache: Arc::new(NodeCache::new(cache_size)),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    // === Node entries ===

    /// Raw storage encoding of a node
    pub fn get_node(&self, key: &NodeKey) -> Result<Option<Vec<u8>>> {
        self.store.get(&node_store_key(key))
    }

    pub fn set_node(&self, key: &NodeKey, encoded: Vec<u8>) -> Result<()> {
        let mut batch = Batch::new();
        Self::batch_set_node(&mut batch, key, encoded);
        self.store.write(batch)
    }

    pub fn delete_node(&self, key: &NodeKey) -> Result<()> {
        let mut batch = Batch::new();
        Self::batch_delete_node(&mut batch, key);
        self.write(batch)?;
        self.cache.remove(key);
        Ok(())
    }

    pub fn batch_set_node(batch: &mut Batch, key: &NodeKey, encoded: Vec<u8>) {
        batch.set(node_store_key(key), encoded);
    }

    pub fn batch_delete_node(batch: &mut Batch, key: &NodeKey) {
        batch.delete(node_store_key(key));
    }

    /// Number of node entries in the store
    pub fn node_count(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(&[NODE_PREFIX])?.len())
    }

    /// Load and decode a committed node.
    ///
    /// A missing entry or an undecodable one means the tree is corrupt.
    pub fn load_node(&self, key: &NodeKey) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.get(key) {
            return Ok(node);
        }

        debug!(node_key = %key, "loading node from store");
        let corrupt = |reason: String| Error::CorruptTree {
            node_key: *key,
            reason,
        };
        let encoded = self
            .get_node(key)?
            .ok_or_else(|| corrupt("node missing from store".into()))?;
        let node = Node::decode(*key, &encoded).map_err(|e| corrupt(e.to_string()))?;

        let node = Arc::new(node);
        self.cache.insert(*key, Arc::clone(&node));
        Ok(node)
    }

    /// Resolve a child slot to an in-memory node
    pub fn resolve(&self, child: &Child) -> Result<Arc<Node>> {
        match child {
            Child::Owned(node) => Ok(Arc::clone(node)),
            Child::Reference(key) => self.load_node(key),
        }
    }

    /// Resolve a child slot that the tree shape requires to be present
    pub(crate) fn resolve_required(&self, parent: &Node, child: Option<&Child>) -> Result<Arc<Node>> {
        match child {
            Some(child) => self.resolve(child),
            None => Err(match parent.node_key() {
                Some(node_key) => Error::CorruptTree {
                    node_key,
                    reason: "inner node is missing a child".into(),
                },
                None => Error::InvalidNode("inner node is missing a child".into()),
            }),
        }
    }

    // === Version roots ===

    pub fn batch_set_root(batch: &mut Batch, version: i64, root: Option<NodeKey>) {
        let value = root.map(|k| k.encode()).unwrap_or_default();
        batch.set(version_store_key(ROOT_PREFIX, version), value);
    }

    pub fn batch_delete_root(batch: &mut Batch, version: i64) {
        batch.delete(version_store_key(ROOT_PREFIX, version));
    }

    /// Every committed version and its root
    pub fn roots(&self) -> Result<BTreeMap<i64, Option<NodeKey>>> {
        let mut roots = BTreeMap::new();
        for (key, value) in self.store.scan_prefix(&[ROOT_PREFIX])? {
            let version = version_from_store_key(&key)?;
            let root = if value.is_empty() {
                None
            } else {
                Some(NodeKey::decode(&value)?.0)
            };
            roots.insert(version, root);
        }
        Ok(roots)
    }

    // === Orphan records ===

    pub fn batch_set_orphans(batch: &mut Batch, version: i64, orphans: &[NodeKey]) -> Result<()> {
        batch.set(
            version_store_key(ORPHAN_PREFIX, version),
            bincode::serialize(orphans)?,
        );
        Ok(())
    }

    pub fn batch_delete_orphans(batch: &mut Batch, version: i64) {
        batch.delete(version_store_key(ORPHAN_PREFIX, version));
    }

    /// Orphan records keyed by the version that orphaned them
    pub fn orphans(&self) -> Result<BTreeMap<i64, Vec<NodeKey>>> {
        let mut records = BTreeMap::new();
        for (key, value) in self.store.scan_prefix(&[ORPHAN_PREFIX])? {
            let version = version_from_store_key(&key)?;
            records.insert(version, bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    // === Writes ===

    /// Apply a batch atomically
    pub fn write(&self, batch: Batch) -> Result<()> {
        self.store.write(batch)
    }

    /// Drop cached copies of nodes that were deleted from the store
    pub fn evict(&self, keys: &[NodeKey]) {
        for key in keys {
            self.cache.remove(key);
        }
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use bytes::Bytes;

    fn ndb() -> NodeDb {
        NodeDb::new(Arc::new(MemStore::new()), 16)
    }

    #[test]
    fn test_node_store_keys_sort_by_version() {
        assert!(node_store_key(&NodeKey::new(1, 500)) < node_store_key(&NodeKey::new(2, 1)));
        assert!(node_store_key(&NodeKey::new(256, 1)) > node_store_key(&NodeKey::new(255, 9)));
    }

    #[test]
    fn test_set_load_delete_node() {
        let ndb = ndb();
        let key = NodeKey::new(1, 1);
        let leaf = Node::new_leaf(Bytes::from_static(b"k"), Bytes::from_static(b"v"));
        ndb.set_node(&key, leaf.encode().unwrap()).unwrap();

        let loaded = ndb.load_node(&key).unwrap();
        assert_eq!(loaded.key(), &Bytes::from_static(b"k"));
        assert_eq!(loaded.node_key(), Some(key));
        assert!(loaded.hash().is_some());

        ndb.delete_node(&key).unwrap();
        assert!(ndb.get_node(&key).unwrap().is_none());
        assert!(matches!(ndb.load_node(&key), Err(Error::CorruptTree { .. })));
    }

    #[test]
    fn test_undecodable_node_is_corruption() {
        let ndb = ndb();
        let key = NodeKey::new(4, 2);
        ndb.set_node(&key, vec![0x05]).unwrap();
        assert!(matches!(
            ndb.load_node(&key),
            Err(Error::CorruptTree { node_key, .. }) if node_key == key
        ));
    }

    #[test]
    fn test_roots_and_orphans() {
        let ndb = ndb();
        let mut batch = Batch::new();
        NodeDb::batch_set_root(&mut batch, 1, Some(NodeKey::new(1, 3)));
        NodeDb::batch_set_root(&mut batch, 2, None);
        NodeDb::batch_set_orphans(&mut batch, 2, &[NodeKey::new(1, 1), NodeKey::new(1, 3)])
            .unwrap();
        ndb.write(batch).unwrap();

        let roots = ndb.roots().unwrap();
        assert_eq!(roots.get(&1), Some(&Some(NodeKey::new(1, 3))));
        assert_eq!(roots.get(&2), Some(&None));

        let orphans = ndb.orphans().unwrap();
        assert_eq!(orphans[&2], vec![NodeKey::new(1, 1), NodeKey::new(1, 3)]);
    }
}
