//! The working tree and version manager

use super::immutable::{get, get_by_index};
use super::{Child, ImmutableTree, Node, Range};
use crate::config::TreeConfig;
use crate::model::{Hash, NodeKey};
use crate::ops::{self, Diff};
use crate::store::{Batch, KvStore, NodeDb};
use crate::{Error, Result};
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// A versioned AVL+ tree.
///
/// Writes go to an in-memory working tree built on top of the most recent
/// commit. Nodes from committed versions are never changed in place: every
/// write copies the path it touches, and the superseded committed nodes are
/// recorded as orphans of the next version.
///
/// Mutation and commit take `&mut self`, so the working tree is never read
/// while a commit is assigning node keys. Committed versions are exposed as
/// [`ImmutableTree`] views that can be shared freely.
///
/// Once any operation reports [`Error::CorruptTree`], later writes and
/// commits fail with that same error. Reads of intact keys keep working.
pub struct MutableTree {
    ndb: NodeDb,
    config: TreeConfig,
    root: Option<Arc<Node>>,
    last_saved: ImmutableTree,
    /// Committed versions and their roots
    versions: BTreeMap<i64, Option<NodeKey>>,
    /// Committed nodes superseded by the working tree
    orphans: Vec<NodeKey>,
    dirty: bool,
    /// First unresolvable node seen, if any
    corrupt: OnceLock<(NodeKey, String)>,
}

impl MutableTree {
    /// Open the tree stored in `store` at its latest committed version
    pub fn open(store: Arc<dyn KvStore>, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let ndb = NodeDb::new(store, config.cache_size);
        let versions = ndb.roots()?;

        let (version, root) = match versions.last_key_value() {
            Some((&version, Some(root_key))) => (version, Some(ndb.load_node(root_key)?)),
            Some((&version, None)) => (version, None),
            None => (0, None),
        };
        info!(version, versions = versions.len(), "opened tree");

        Ok(MutableTree {
            last_saved: ImmutableTree::new(ndb.clone(), root.clone(), version),
            ndb,
            config,
            root,
            versions,
            orphans: Vec::new(),
            dirty: false,
            corrupt: OnceLock::new(),
        })
    }

    /// An empty tree over a fresh in-memory store
    pub fn in_memory(config: TreeConfig) -> Result<Self> {
        Self::open(Arc::new(crate::store::MemStore::new()), config)
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn node_db(&self) -> &NodeDb {
        &self.ndb
    }

    // === Working tree reads ===

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.track(get(&self.ndb, self.root.as_ref(), key))
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn get_by_index(&self, index: i64) -> Result<Option<(Bytes, Bytes)>> {
        self.track(get_by_index(&self.ndb, self.root.as_ref(), index))
    }

    pub fn iter(&self) -> Range {
        self.range(None, None, true)
    }

    /// Entries of the working tree with `start <= key < end`
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>, ascending: bool) -> Range {
        Range::new(self.ndb.clone(), self.root.clone(), start, end, ascending)
    }

    pub fn size(&self) -> i64 {
        self.root.as_ref().map_or(0, |root| root.size)
    }

    pub fn height(&self) -> u8 {
        self.root.as_ref().map_or(0, |root| root.height)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    /// Whether the working tree has changes since the last commit
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a missing or undecodable node has been hit
    pub fn is_corrupt(&self) -> bool {
        self.corrupt.get().is_some()
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::CorruptTree { node_key, reason }) = &result {
            let _ = self.corrupt.set((*node_key, reason.clone()));
        }
        result
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.corrupt.get() {
            Some((node_key, reason)) => Err(Error::CorruptTree {
                node_key: *node_key,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    // === Writes ===

    /// Insert or replace `key`. Returns true if an existing value was replaced.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        let value = Bytes::copy_from_slice(value);
        let mut mutation = Mutation::new(&self.ndb);
        let (root, updated) = match &self.root {
            Some(root) => self.track(mutation.set(root, key, value))?,
            None => (
                Arc::new(Node::new_leaf(Bytes::copy_from_slice(key), value)),
                false,
            ),
        };

        self.orphans.extend(mutation.orphans);
        self.root = Some(root);
        self.dirty = true;
        Ok(updated)
    }

    /// Remove `key`, returning its value. An absent key leaves the tree untouched.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_writable()?;
        let Some(root) = &self.root else {
            return Ok(None);
        };
        let mut mutation = Mutation::new(&self.ndb);
        let removal = self.track(mutation.remove(root, key))?;
        let Some(value) = removal.removed else {
            return Ok(None);
        };

        self.orphans.extend(mutation.orphans);
        self.root = removal.node;
        self.dirty = true;
        Ok(Some(value))
    }

    /// Discard every change since the last commit
    pub fn rollback(&mut self) {
        self.root = self.last_saved.root().cloned();
        self.orphans.clear();
        self.dirty = false;
    }

    // === Versions ===

    /// The latest committed version, 0 if nothing has been committed
    pub fn version(&self) -> i64 {
        self.last_saved.version()
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.versions.keys().next_back().copied()
    }

    /// The version the next commit will create
    pub fn next_version(&self) -> i64 {
        match self.latest_version() {
            Some(latest) => latest + 1,
            None => self.config.initial_version,
        }
    }

    pub fn available_versions(&self) -> Vec<i64> {
        self.versions.keys().copied().collect()
    }

    pub fn version_exists(&self, version: i64) -> bool {
        self.versions.contains_key(&version)
    }

    /// Root hash of the latest commit
    pub fn root_hash(&self) -> Hash {
        self.last_saved.root_hash()
    }

    pub fn last_saved(&self) -> &ImmutableTree {
        &self.last_saved
    }

    /// Read-only view of a committed version
    pub fn get_immutable(&self, version: i64) -> Result<ImmutableTree> {
        if version == self.last_saved.version() && self.latest_version().is_some() {
            return Ok(self.last_saved.clone());
        }
        let root_key = *self
            .versions
            .get(&version)
            .ok_or(Error::VersionNotFound(version))?;
        let root = root_key.map(|key| self.ndb.load_node(&key)).transpose()?;
        Ok(ImmutableTree::new(self.ndb.clone(), root, version))
    }

    pub fn get_versioned(&self, key: &[u8], version: i64) -> Result<Option<Bytes>> {
        self.get_immutable(version)?.get(key)
    }

    pub fn root_hash_at(&self, version: i64) -> Result<Hash> {
        Ok(self.get_immutable(version)?.root_hash())
    }

    /// Key-level changes from version `from` to version `to`
    pub fn diff(&self, from: i64, to: i64) -> Result<Diff> {
        ops::diff_versions(&self.get_immutable(from)?, &self.get_immutable(to)?)
    }

    /// Root hash the next commit would produce, without persisting anything
    pub fn working_hash(&self) -> Result<Hash> {
        match &self.root {
            Some(root) => self.track(self.hash_subtree(root, self.next_version())),
            None => Ok(Hash::empty()),
        }
    }

    fn hash_subtree(&self, node: &Arc<Node>, version: i64) -> Result<Hash> {
        if let Some(hash) = node.hash {
            return Ok(hash);
        }
        if node.is_leaf() {
            return node.compute_hash(version);
        }
        let left = self.ndb.resolve_required(node, node.left())?;
        let right = self.ndb.resolve_required(node, node.right())?;
        node.compute_inner_hash(
            self.hash_subtree(&left, version)?,
            self.hash_subtree(&right, version)?,
        )
    }

    /// Persist the working tree as a new version.
    ///
    /// New nodes, the version root and the orphan record go to the store in a
    /// single batch. If that write fails nothing changes: the version does not
    /// advance and the working tree keeps its uncommitted changes.
    pub fn commit(&mut self) -> Result<(i64, Hash)> {
        self.ensure_writable()?;
        let version = self.next_version();
        if !self.dirty && !self.config.allow_empty_commits {
            return Err(Error::Commit {
                version,
                reason: "no changes since the last commit".into(),
            });
        }

        let mut batch = Batch::new();
        let mut saver = Saver {
            ndb: &self.ndb,
            version,
            nonce: 0,
            batch: &mut batch,
        };
        let saved = self.root.as_ref().map(|root| saver.save(root)).transpose();
        let created = saver.nonce;
        let root = self.track(saved)?;

        let root_key = root.as_ref().and_then(|root| root.node_key);
        NodeDb::batch_set_root(&mut batch, version, root_key);
        let mut orphans = self.orphans.clone();
        orphans.sort();
        orphans.dedup();
        if !orphans.is_empty() {
            NodeDb::batch_set_orphans(&mut batch, version, &orphans)?;
        }

        let persisted = self.ndb.write(batch).and_then(|()| {
            if self.config.sync_on_commit {
                self.ndb.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = persisted {
            return Err(Error::Commit {
                version,
                reason: e.to_string(),
            });
        }

        self.versions.insert(version, root_key);
        self.last_saved = ImmutableTree::new(self.ndb.clone(), root.clone(), version);
        self.root = root;
        self.orphans.clear();
        self.dirty = false;

        let hash = self.last_saved.root_hash();
        info!(
            version,
            nodes = created,
            orphans = orphans.len(),
            root = %hash.short(),
            "committed version"
        );
        Ok((version, hash))
    }

    // === Pruning ===

    /// Delete every version not in `retain`, except the latest, along with the
    /// nodes only they could reach. Returns the number of nodes deleted.
    pub fn prune(&mut self, retain: &BTreeSet<i64>) -> Result<usize> {
        let deleted = ops::prune_versions(&self.ndb, &mut self.versions, retain)?;
        if self.config.sync_on_commit {
            self.ndb.sync()?;
        }
        Ok(deleted)
    }

    /// Delete every version up to and including `version`, except the latest
    pub fn delete_versions_to(&mut self, version: i64) -> Result<usize> {
        let retain: BTreeSet<i64> = self
            .versions
            .range(version.saturating_add(1)..)
            .map(|(v, _)| *v)
            .collect();
        self.prune(&retain)
    }
}

/// Copies nodes from `node` into a version being committed
struct Saver<'a> {
    ndb: &'a NodeDb,
    version: i64,
    nonce: i32,
    batch: &'a mut Batch,
}

impl Saver<'_> {
    /// Key, hash and encode the dirty nodes under `node`, children first
    fn save(&mut self, node: &Arc<Node>) -> Result<Arc<Node>> {
        if node.node_key.is_some() {
            return Ok(Arc::clone(node));
        }

        let mut saved = Node::clone(node);
        if !saved.is_leaf() {
            let left = self.ndb.resolve_required(node, node.left())?;
            let right = self.ndb.resolve_required(node, node.right())?;
            saved.left = Some(Child::Owned(self.save(&left)?));
            saved.right = Some(Child::Owned(self.save(&right)?));
        }

        self.nonce = self.nonce.checked_add(1).ok_or_else(|| Error::Commit {
            version: self.version,
            reason: "too many new nodes in one version".into(),
        })?;
        let node_key = NodeKey::new(self.version, self.nonce);
        saved.node_key = Some(node_key);
        saved.hash = Some(saved.compute_hash(self.version)?);
        saved.validate()?;

        NodeDb::batch_set_node(self.batch, &node_key, saved.encode()?);
        Ok(Arc::new(saved))
    }
}

/// Result of removing a key from a subtree
struct Removal {
    /// The replacement subtree, `None` if it became empty
    node: Option<Arc<Node>>,
    /// New smallest key of the subtree, if it changed
    new_key: Option<Bytes>,
    removed: Option<Bytes>,
}

impl Removal {
    fn unchanged(node: &Arc<Node>) -> Self {
        Removal {
            node: Some(Arc::clone(node)),
            new_key: None,
            removed: None,
        }
    }
}

/// One copy-on-write change to the working tree.
///
/// Collects the committed nodes it supersedes; they only become orphans if
/// the whole operation succeeds.
struct Mutation<'a> {
    ndb: &'a NodeDb,
    orphans: Vec<NodeKey>,
}

impl<'a> Mutation<'a> {
    fn new(ndb: &'a NodeDb) -> Self {
        Mutation {
            ndb,
            orphans: Vec::new(),
        }
    }

    fn orphan(&mut self, node: &Node) {
        if let Some(node_key) = node.node_key {
            self.orphans.push(node_key);
        }
    }

    /// A dirty copy of `node`, orphaning the original if it was committed
    fn copy(&mut self, node: &Node) -> Node {
        self.orphan(node);
        Node {
            node_key: None,
            hash: None,
            ..node.clone()
        }
    }

    fn left(&self, node: &Node) -> Result<Arc<Node>> {
        self.ndb.resolve_required(node, node.left())
    }

    fn right(&self, node: &Node) -> Result<Arc<Node>> {
        self.ndb.resolve_required(node, node.right())
    }

    fn set(&mut self, node: &Arc<Node>, key: &[u8], value: Bytes) -> Result<(Arc<Node>, bool)> {
        if node.is_leaf() {
            let leaf = || Arc::new(Node::new_leaf(Bytes::copy_from_slice(key), value.clone()));
            let result = match key.cmp(node.key.as_ref()) {
                Ordering::Less => {
                    let inner = Node::new_inner(node.key.clone(), leaf(), Arc::clone(node));
                    (Arc::new(inner), false)
                }
                Ordering::Greater => {
                    let inner = Node::new_inner(Bytes::copy_from_slice(key), Arc::clone(node), leaf());
                    (Arc::new(inner), false)
                }
                Ordering::Equal => {
                    self.orphan(node);
                    (Arc::new(Node::new_leaf(node.key.clone(), value.clone())), true)
                }
            };
            return Ok(result);
        }

        let mut copy = self.copy(node);
        let updated = if key < node.key.as_ref() {
            let left = self.left(node)?;
            let (child, updated) = self.set(&left, key, value)?;
            copy.left = Some(Child::Owned(child));
            updated
        } else {
            let right = self.right(node)?;
            let (child, updated) = self.set(&right, key, value)?;
            copy.right = Some(Child::Owned(child));
            updated
        };

        if updated {
            return Ok((Arc::new(copy), true));
        }
        self.refresh(&mut copy)?;
        Ok((self.balance(copy)?, false))
    }

    fn remove(&mut self, node: &Arc<Node>, key: &[u8]) -> Result<Removal> {
        if node.is_leaf() {
            if node.key.as_ref() != key {
                return Ok(Removal::unchanged(node));
            }
            self.orphan(node);
            return Ok(Removal {
                node: None,
                new_key: None,
                removed: Some(node.value.clone().unwrap_or_default()),
            });
        }

        if key < node.key.as_ref() {
            let left = self.left(node)?;
            let removal = self.remove(&left, key)?;
            if removal.removed.is_none() {
                return Ok(Removal::unchanged(node));
            }
            let Some(new_left) = removal.node else {
                // the right subtree takes this node's place
                self.orphan(node);
                return Ok(Removal {
                    node: Some(self.right(node)?),
                    new_key: Some(node.key.clone()),
                    removed: removal.removed,
                });
            };

            let mut copy = self.copy(node);
            copy.left = Some(Child::Owned(new_left));
            self.refresh(&mut copy)?;
            Ok(Removal {
                node: Some(self.balance(copy)?),
                new_key: removal.new_key,
                removed: removal.removed,
            })
        } else {
            let right = self.right(node)?;
            let removal = self.remove(&right, key)?;
            if removal.removed.is_none() {
                return Ok(Removal::unchanged(node));
            }
            let Some(new_right) = removal.node else {
                self.orphan(node);
                return Ok(Removal {
                    node: Some(self.left(node)?),
                    new_key: None,
                    removed: removal.removed,
                });
            };

            let mut copy = self.copy(node);
            copy.right = Some(Child::Owned(new_right));
            if let Some(new_key) = removal.new_key {
                copy.key = new_key;
            }
            self.refresh(&mut copy)?;
            Ok(Removal {
                node: Some(self.balance(copy)?),
                new_key: None,
                removed: removal.removed,
            })
        }
    }

    /// Recompute height and size from the children
    fn refresh(&self, node: &mut Node) -> Result<()> {
        let left = self.left(node)?;
        let right = self.right(node)?;
        node.height = left.height.max(right.height) + 1;
        node.size = left.size + right.size;
        Ok(())
    }

    fn balance_factor(&self, node: &Node) -> Result<i16> {
        if node.is_leaf() {
            return Ok(0);
        }
        let left = self.left(node)?;
        let right = self.right(node)?;
        Ok(i16::from(left.height) - i16::from(right.height))
    }

    /// Restore the AVL property at a freshly copied node
    fn balance(&mut self, mut node: Node) -> Result<Arc<Node>> {
        let factor = self.balance_factor(&node)?;
        if factor > 1 {
            let left = self.left(&node)?;
            if self.balance_factor(&left)? < 0 {
                let copy = self.copy(&left);
                node.left = Some(Child::Owned(self.rotate_left(copy)?));
            }
            return self.rotate_right(node);
        }
        if factor < -1 {
            let right = self.right(&node)?;
            if self.balance_factor(&right)? > 0 {
                let copy = self.copy(&right);
                node.right = Some(Child::Owned(self.rotate_right(copy)?));
            }
            return self.rotate_left(node);
        }
        Ok(Arc::new(node))
    }

    fn rotate_right(&mut self, mut node: Node) -> Result<Arc<Node>> {
        let left = self.left(&node)?;
        let mut pivot = self.copy(&left);
        node.left = pivot.right.take();
        self.refresh(&mut node)?;
        pivot.right = Some(Child::Owned(Arc::new(node)));
        self.refresh(&mut pivot)?;
        debug!(pivot = ?pivot.key, "rotated right");
        Ok(Arc::new(pivot))
    }

    fn rotate_left(&mut self, mut node: Node) -> Result<Arc<Node>> {
        let right = self.right(&node)?;
        let mut pivot = self.copy(&right);
        node.right = pivot.left.take();
        self.refresh(&mut node)?;
        pivot.left = Some(Child::Owned(Arc::new(node)));
        self.refresh(&mut pivot)?;
        debug!(pivot = ?pivot.key, "rotated left");
        Ok(Arc::new(pivot))
    }
}
