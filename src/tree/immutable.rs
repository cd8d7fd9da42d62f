//! Read-only view of one committed version

use super::{Node, Range};
use crate::model::Hash;
use crate::store::NodeDb;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;

/// A committed version of the tree.
///
/// Every node reachable from it is immutable, so views can be cloned and read
/// from any number of threads while the working tree keeps changing.
#[derive(Clone)]
pub struct ImmutableTree {
    ndb: NodeDb,
    root: Option<Arc<Node>>,
    version: i64,
}

impl ImmutableTree {
    pub(crate) fn new(ndb: NodeDb, root: Option<Arc<Node>>, version: i64) -> Self {
        ImmutableTree { ndb, root, version }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    /// Root hash, `Hash::empty()` for an empty tree
    pub fn root_hash(&self) -> Hash {
        self.root
            .as_ref()
            .and_then(|root| root.hash)
            .unwrap_or_else(Hash::empty)
    }

    /// Number of keys
    pub fn size(&self) -> i64 {
        self.root.as_ref().map_or(0, |root| root.size)
    }

    pub fn height(&self) -> u8 {
        self.root.as_ref().map_or(0, |root| root.height)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        get(&self.ndb, self.root.as_ref(), key)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// The `index`-th entry in key order
    pub fn get_by_index(&self, index: i64) -> Result<Option<(Bytes, Bytes)>> {
        get_by_index(&self.ndb, self.root.as_ref(), index)
    }

    /// All entries in ascending key order
    pub fn iter(&self) -> Range {
        self.range(None, None, true)
    }

    /// Entries with `start <= key < end`; `None` leaves a side unbounded
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>, ascending: bool) -> Range {
        Range::new(self.ndb.clone(), self.root.clone(), start, end, ascending)
    }
}

pub(crate) fn get(ndb: &NodeDb, root: Option<&Arc<Node>>, key: &[u8]) -> Result<Option<Bytes>> {
    let Some(root) = root else {
        return Ok(None);
    };
    let mut node = Arc::clone(root);
    while !node.is_leaf() {
        let next = if key < node.key.as_ref() {
            ndb.resolve_required(&node, node.left())?
        } else {
            ndb.resolve_required(&node, node.right())?
        };
        node = next;
    }
    Ok((node.key.as_ref() == key).then(|| node.value.clone().unwrap_or_default()))
}

pub(crate) fn get_by_index(
    ndb: &NodeDb,
    root: Option<&Arc<Node>>,
    mut index: i64,
) -> Result<Option<(Bytes, Bytes)>> {
    let Some(root) = root else {
        return Ok(None);
    };
    if index < 0 || index >= root.size {
        return Ok(None);
    }
    let mut node = Arc::clone(root);
    while !node.is_leaf() {
        let left = ndb.resolve_required(&node, node.left())?;
        let next = if index < left.size {
            left
        } else {
            index -= left.size;
            ndb.resolve_required(&node, node.right())?
        };
        node = next;
    }
    Ok(Some((node.key.clone(), node.value.clone().unwrap_or_default())))
}
