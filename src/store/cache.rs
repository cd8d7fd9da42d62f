//! Bounded cache of resolved nodes

use crate::model::NodeKey;
use crate::tree::Node;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct Inner {
    nodes: HashMap<NodeKey, Arc<Node>>,
    /// Insertion order, oldest first
    order: VecDeque<NodeKey>,
}

/// Recently decoded committed nodes, evicted oldest-first.
///
/// Committed nodes never change, so a cached copy is never stale; entries
/// only have to go when pruning deletes the backing node.
pub struct NodeCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl NodeCache {
    /// A cache holding at most `capacity` nodes; zero disables caching
    pub fn new(capacity: usize) -> Self {
        NodeCache {
            capacity,
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<Arc<Node>> {
        self.inner.lock().nodes.get(key).cloned()
    }

    pub fn insert(&self, key: NodeKey, node: Arc<Node>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.nodes.insert(key, node).is_none() {
            inner.order.push_back(key);
        }
        while inner.nodes.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.nodes.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &NodeKey) {
        let mut inner = self.inner.lock();
        if inner.nodes.remove(key).is_some() {
            inner.order.retain(|k| k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn leaf(i: u8) -> Arc<Node> {
        Arc::new(Node::new_leaf(Bytes::from(vec![i]), Bytes::new()))
    }

    #[test]
    fn test_evicts_oldest() {
        let cache = NodeCache::new(2);
        cache.insert(NodeKey::new(1, 1), leaf(1));
        cache.insert(NodeKey::new(1, 2), leaf(2));
        cache.insert(NodeKey::new(1, 3), leaf(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&NodeKey::new(1, 1)).is_none());
        assert!(cache.get(&NodeKey::new(1, 3)).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = NodeCache::new(0);
        cache.insert(NodeKey::new(1, 1), leaf(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove() {
        let cache = NodeCache::new(4);
        cache.insert(NodeKey::new(2, 1), leaf(1));
        cache.remove(&NodeKey::new(2, 1));
        assert!(cache.get(&NodeKey::new(2, 1)).is_none());
        assert!(cache.is_empty());
    }
}
