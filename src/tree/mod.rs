//! The AVL+ tree: nodes, committed views and the working tree

mod immutable;
mod iter;
mod mutable;
mod node;

pub use immutable::ImmutableTree;
pub use iter::Range;
pub use mutable::MutableTree;
pub use node::{encode_node, validate_node, Child, Node};
