//! # iavl_db
//!
//! A versioned, Merkle-hashed, persistent AVL+ tree.
//!
//! Every commit produces a new immutable version identified by an increasing
//! integer and a root hash that commits to the full key/value contents.
//! Unchanged subtrees are shared between versions; old versions can be read
//! until they are pruned.
//!
//! ## Core Concepts
//!
//! - **Nodes**: leaves hold key/value pairs, inner nodes hold routing keys
//! - **NodeKeys**: `(version, nonce)` addresses assigned at commit time
//! - **Versions**: immutable snapshots, read through [`ImmutableTree`]
//! - **Orphans**: committed nodes superseded by a later version, deleted by pruning
//!
//! ## Example
//!
//! ```
//! use iavl_db::{MutableTree, TreeConfig};
//!
//! let mut tree = MutableTree::in_memory(TreeConfig::default())?;
//! tree.set(b"a", b"1")?;
//! tree.set(b"b", b"2")?;
//! let (version, hash) = tree.commit()?;
//!
//! tree.remove(b"a")?;
//! tree.commit()?;
//! assert_eq!(tree.get_versioned(b"a", version)?.as_deref(), Some(&b"1"[..]));
//! assert_eq!(tree.root_hash_at(version)?, hash);
//! # Ok::<(), iavl_db::Error>(())
//! ```

pub mod config;
pub mod encoding;
pub mod model;
pub mod ops;
pub mod store;
pub mod tree;

mod error;

pub use config::TreeConfig;
pub use error::{Error, Result};
pub use model::{Hash, NodeKey};
pub use ops::{Diff, DiffEntry};
pub use store::{FileStore, KvStore, MemStore};
pub use tree::{ImmutableTree, MutableTree, Node};

/// File format version
pub const VERSION: u32 = 1;

/// Magic bytes at the start of a database file
pub const MAGIC: &[u8; 8] = b"IAVL_DB\0";
