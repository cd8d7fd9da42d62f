//! Node addresses: the `(version, nonce)` pair a node was created at

use crate::encoding::{decode_compact, encode_compact};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a committed node.
///
/// Ordered by version, then nonce. Assigned once, when the version that
/// created the node is committed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    version: i64,
    nonce: i32,
}

impl NodeKey {
    pub const fn new(version: i64, nonce: i32) -> Self {
        NodeKey { version, nonce }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn nonce(&self) -> i32 {
        self.nonce
    }

    /// Canonical encoding: compact version followed by compact nonce
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Append the canonical encoding, returning the bytes written
    pub fn encode_to(&self, buf: &mut Vec<u8>) -> usize {
        encode_compact(buf, self.version as u64) + encode_compact(buf, self.nonce as u32 as u64)
    }

    pub fn encoded_len(&self) -> usize {
        crate::encoding::compact_len(self.version as u64)
            + crate::encoding::compact_len(self.nonce as u32 as u64)
    }

    /// Decode a key from the front of `buf`, returning it with the bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(NodeKey, usize)> {
        let (version, used_version) =
            decode_compact(buf, 8).map_err(|e| Error::MalformedKey(format!("version: {e}")))?;
        let (nonce, used_nonce) = decode_compact(&buf[used_version..], 4)
            .map_err(|e| Error::MalformedKey(format!("nonce: {e}")))?;

        let version = i64::try_from(version)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| Error::MalformedKey(format!("version out of range: {version}")))?;
        let nonce = i32::try_from(nonce)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::MalformedKey(format!("nonce out of range: {nonce}")))?;

        Ok((NodeKey { version, nonce }, used_version + used_nonce))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.version, self.nonce)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey{self}")
    }
}
