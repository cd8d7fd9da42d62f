//! Error types for iavl_db

use crate::model::NodeKey;
use thiserror::Error;

/// Result type alias for iavl_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in iavl_db operations
///
/// A key that is absent from the tree is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A node key buffer was truncated or not canonical
    #[error("Malformed node key: {0}")]
    MalformedKey(String),

    /// A node buffer was truncated, had trailing bytes, or carried bad fields
    #[error("Malformed node: {0}")]
    MalformedNode(String),

    /// A node could not be encoded in its current state
    #[error("Cannot encode node: {0}")]
    Encode(String),

    /// An in-memory node violates the structural invariants
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// A child reference could not be resolved against the backing store.
    /// The tree must not be written to again until this is investigated.
    #[error("Corrupt tree at node {node_key}: {reason}")]
    CorruptTree { node_key: NodeKey, reason: String },

    /// A commit did not happen; the previous version is still current
    #[error("Commit of version {version} failed: {reason}")]
    Commit { version: i64, reason: String },

    #[error("Version not found: {0}")]
    VersionNotFound(i64),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}
