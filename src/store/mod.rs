//! Backing storage for committed nodes
//!
//! The tree only needs an ordered key/value store with point reads, prefix
//! scans and atomic batch writes ([`KvStore`]). [`NodeDb`] lays nodes, version
//! roots and orphan records out on top of it.

mod cache;
mod file_store;
mod memory;
mod node_db;
mod record;

pub use cache::NodeCache;
pub use file_store::FileStore;
pub use memory::MemStore;
pub use node_db::NodeDb;
pub use record::{Record, RecordKind};

use crate::Result;
use serde::{Deserialize, Serialize};

/// A single write inside a [`Batch`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A group of writes applied all together or not at all
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Set { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ordered key/value storage consumed by the tree
pub trait KvStore: Send + Sync {
    /// Point read
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every operation in `batch` atomically
    fn write(&self, batch: Batch) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Flush buffered state to durable storage
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
