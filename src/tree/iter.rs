//! Lazy in-order traversal over a key range

use super::Node;
use crate::store::NodeDb;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;

/// Iterator over `(key, value)` pairs with `start <= key < end`.
///
/// Children are loaded from the store only when the cursor reaches them, and
/// subtrees entirely outside the range are never visited. After an error the
/// iterator is exhausted.
pub struct Range {
    ndb: NodeDb,
    stack: Vec<Arc<Node>>,
    start: Option<Bytes>,
    end: Option<Bytes>,
    ascending: bool,
    done: bool,
}

impl Range {
    pub(crate) fn new(
        ndb: NodeDb,
        root: Option<Arc<Node>>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Self {
        Range {
            ndb,
            stack: root.into_iter().collect(),
            start: start.map(Bytes::copy_from_slice),
            end: end.map(Bytes::copy_from_slice),
            ascending,
            done: false,
        }
    }

    fn in_range(&self, key: &[u8]) -> bool {
        self.start.as_deref().map_or(true, |s| key >= s)
            && self.end.as_deref().map_or(true, |e| key < e)
    }

    /// Queue the children of an inner node that may hold keys in range
    fn descend(&mut self, node: &Node) -> Result<()> {
        // left keys are < node.key, right keys are >= node.key
        let visit_left = self.start.as_deref().map_or(true, |s| s < node.key.as_ref());
        let visit_right = self.end.as_deref().map_or(true, |e| e > node.key.as_ref());

        let left = if visit_left {
            Some(self.ndb.resolve_required(node, node.left())?)
        } else {
            None
        };
        let right = if visit_right {
            Some(self.ndb.resolve_required(node, node.right())?)
        } else {
            None
        };

        // the side to visit first goes on top
        let (first, second) = if self.ascending {
            (left, right)
        } else {
            (right, left)
        };
        self.stack.extend(second);
        self.stack.extend(first);
        Ok(())
    }
}

impl Iterator for Range {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(node) = self.stack.pop() {
            if node.is_leaf() {
                if self.in_range(&node.key) {
                    let value = node.value.clone().unwrap_or_default();
                    return Some(Ok((node.key.clone(), value)));
                }
                continue;
            }
            if let Err(e) = self.descend(&node) {
                self.done = true;
                self.stack.clear();
                return Some(Err(e));
            }
        }
        self.done = true;
        None
    }
}
