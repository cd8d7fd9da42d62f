//! Core value types for iavl_db

mod hash;
mod node_key;

pub use hash::{Hash, HASH_LEN};
pub use node_key::NodeKey;
