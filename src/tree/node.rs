//! Tree nodes and their canonical encoding
//!
//! Storage layout (all integers compact, see [`crate::encoding`]):
//! ```text
//! height: 1 byte
//! size:   cint
//! key:    cint length ‖ bytes
//! leaf:   value bytes to the end of the buffer
//! inner:  own hash (32 bytes) ‖ left NodeKey ‖ right NodeKey
//! ```
//!
//! The hash stream differs from storage: it uses zigzag varints, drops the
//! node's own hash, and embeds the children's hashes in place of their keys.

use crate::encoding::{
    decode_compact, encode_compact, write_bytes, write_varint, MAX_COMPACT_WIDTH,
};
use crate::model::{Hash, NodeKey, HASH_LEN};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;

/// A child slot of an inner node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Child {
    /// Held in memory: either a node built by the working tree (no node key
    /// yet) or a committed node already resolved from the store
    Owned(Arc<Node>),
    /// A committed node not yet loaded
    Reference(NodeKey),
}

impl Child {
    /// The committed address of this child, if it has one
    pub fn node_key(&self) -> Option<NodeKey> {
        match self {
            Child::Owned(node) => node.node_key,
            Child::Reference(key) => Some(*key),
        }
    }
}

/// A node in the AVL+ tree.
///
/// Leaves (height 0) carry a key and value. Inner nodes carry the smallest key
/// of their right subtree and two children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub(crate) key: Bytes,
    pub(crate) value: Option<Bytes>,
    pub(crate) height: u8,
    pub(crate) size: i64,
    pub(crate) node_key: Option<NodeKey>,
    pub(crate) left: Option<Child>,
    pub(crate) right: Option<Child>,
    pub(crate) hash: Option<Hash>,
}

impl Node {
    /// Create an uncommitted leaf
    pub fn new_leaf(key: Bytes, value: Bytes) -> Self {
        Node {
            key,
            value: Some(value),
            height: 0,
            size: 1,
            node_key: None,
            left: None,
            right: None,
            hash: None,
        }
    }

    /// Create an uncommitted inner node; height and size come from the children
    pub fn new_inner(key: Bytes, left: Arc<Node>, right: Arc<Node>) -> Self {
        Node {
            key,
            value: None,
            height: left.height.max(right.height) + 1,
            size: left.size + right.size,
            node_key: None,
            left: Some(Child::Owned(left)),
            right: Some(Child::Owned(right)),
            hash: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.height == 0
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn node_key(&self) -> Option<NodeKey> {
        self.node_key
    }

    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    pub fn left(&self) -> Option<&Child> {
        self.left.as_ref()
    }

    pub fn right(&self) -> Option<&Child> {
        self.right.as_ref()
    }

    /// Structural checks shared by encoding and validation
    fn check_shape(&self) -> std::result::Result<(), &'static str> {
        if self.is_leaf() {
            if self.value.is_none() {
                return Err("leaf has no value");
            }
            if self.size != 1 {
                return Err("leaf size must be 1");
            }
            if self.left.is_some() || self.right.is_some() {
                return Err("leaf has children");
            }
        } else {
            if self.value.is_some() {
                return Err("inner node has a value");
            }
            if self.size < 1 {
                return Err("inner node size must be at least 1");
            }
            if self.left.is_none() && self.right.is_none() {
                return Err("inner node has no children");
            }
        }
        Ok(())
    }

    /// Sanity-check a node before it is persisted.
    ///
    /// Requires a node key with a positive version. Inner nodes need at least
    /// one child reference; balance and completeness are not checked.
    pub fn validate(&self) -> Result<()> {
        self.check_shape()
            .map_err(|reason| Error::InvalidNode(reason.to_string()))?;
        match self.node_key {
            None => Err(Error::InvalidNode("node key is not set".into())),
            Some(nk) if nk.version() <= 0 => Err(Error::InvalidNode(format!(
                "version must be positive, got {}",
                nk.version()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Size of the storage encoding. Inner nodes must have keyed children.
    pub fn encoded_len(&self) -> usize {
        let mut len = 1
            + crate::encoding::compact_len(self.size as u64)
            + crate::encoding::compact_len(self.key.len() as u64)
            + self.key.len();
        if self.is_leaf() {
            len += self.value.as_ref().map_or(0, |v| v.len());
        } else {
            len += HASH_LEN;
            for child in [&self.left, &self.right].into_iter().flatten() {
                len += child.node_key().map_or(0, |nk| nk.encoded_len());
            }
        }
        len
    }

    /// Encode the node in its storage format
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_shape()
            .map_err(|reason| Error::Encode(reason.to_string()))?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.height);
        encode_compact(&mut buf, self.size as u64);
        encode_compact(&mut buf, self.key.len() as u64);
        buf.extend_from_slice(&self.key);

        if self.is_leaf() {
            // check_shape guarantees the value
            buf.extend_from_slice(self.value.as_deref().unwrap_or_default());
            return Ok(buf);
        }

        let hash = self
            .hash
            .ok_or_else(|| Error::Encode("inner node hash not computed".into()))?;
        buf.extend_from_slice(hash.as_bytes());
        for (side, child) in [("left", &self.left), ("right", &self.right)] {
            let child = child
                .as_ref()
                .ok_or_else(|| Error::Encode(format!("inner node missing {side} child")))?;
            let nk = child.node_key().ok_or_else(|| {
                Error::Encode(format!("{side} child has not been committed"))
            })?;
            nk.encode_to(&mut buf);
        }
        Ok(buf)
    }

    /// Rebuild a node from its storage encoding.
    ///
    /// Children come back as [`Child::Reference`]. A leaf's hash is recomputed
    /// from `node_key`'s version; an inner node's hash is read from the buffer.
    pub fn decode(node_key: NodeKey, buf: &[u8]) -> Result<Node> {
        let malformed = |what: &str, e: &str| Error::MalformedNode(format!("{what}: {e}"));

        let height = *buf
            .first()
            .ok_or_else(|| Error::MalformedNode("empty buffer".into()))?;
        let mut pos = 1;

        let (size, used) =
            decode_compact(&buf[pos..], MAX_COMPACT_WIDTH).map_err(|e| malformed("size", e))?;
        pos += used;
        let size = i64::try_from(size).map_err(|_| malformed("size", "out of range"))?;

        let (key_len, used) =
            decode_compact(&buf[pos..], MAX_COMPACT_WIDTH).map_err(|e| malformed("key", e))?;
        pos += used;
        let key_end = usize::try_from(key_len)
            .ok()
            .and_then(|len| pos.checked_add(len))
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| malformed("key", "truncated"))?;
        let key = Bytes::copy_from_slice(&buf[pos..key_end]);
        pos = key_end;

        let mut node = Node {
            key,
            value: None,
            height,
            size,
            node_key: Some(node_key),
            left: None,
            right: None,
            hash: None,
        };

        if node.is_leaf() {
            node.value = Some(Bytes::copy_from_slice(&buf[pos..]));
            node.check_shape().map_err(|e| malformed("leaf", e))?;
            node.hash = Some(node.compute_hash(node_key.version())?);
            return Ok(node);
        }

        let hash = buf
            .get(pos..pos + HASH_LEN)
            .and_then(Hash::from_slice)
            .ok_or_else(|| malformed("hash", "truncated"))?;
        pos += HASH_LEN;

        let (left, used) = NodeKey::decode(&buf[pos..])?;
        pos += used;
        let (right, used) = NodeKey::decode(&buf[pos..])?;
        pos += used;
        if pos != buf.len() {
            return Err(malformed("inner node", "trailing bytes"));
        }

        node.hash = Some(hash);
        node.left = Some(Child::Reference(left));
        node.right = Some(Child::Reference(right));
        node.check_shape().map_err(|e| malformed("inner node", e))?;
        Ok(node)
    }

    /// Append the hash stream for this node to `buf`.
    ///
    /// Inner nodes need both children resolved in memory with hashes set.
    pub fn write_hash_bytes(&self, buf: &mut Vec<u8>, version: i64) -> Result<()> {
        if self.is_leaf() {
            return self.write_hash_stream(buf, version, None);
        }
        let child_hash = |side: &str, child: &Option<Child>| {
            match child {
                Some(Child::Owned(node)) => node.hash,
                _ => None,
            }
            .ok_or_else(|| Error::InvalidNode(format!("{side} child hash unavailable")))
        };
        let children = [
            child_hash("left", &self.left)?,
            child_hash("right", &self.right)?,
        ];
        self.write_hash_stream(buf, version, Some(children))
    }

    fn write_hash_stream(
        &self,
        buf: &mut Vec<u8>,
        version: i64,
        children: Option<[Hash; 2]>,
    ) -> Result<()> {
        write_varint(buf, self.height as i64);
        write_varint(buf, self.size);

        match children {
            None => {
                let value = self
                    .value
                    .as_ref()
                    .ok_or_else(|| Error::InvalidNode("leaf has no value".into()))?;
                write_varint(buf, version);
                write_bytes(buf, &self.key);
                write_bytes(buf, Hash::digest(value).as_bytes());
            }
            Some([left, right]) => {
                write_bytes(buf, &self.key);
                write_bytes(buf, left.as_bytes());
                write_bytes(buf, right.as_bytes());
            }
        }
        Ok(())
    }

    /// Hash of an inner node given its children's hashes
    pub(crate) fn compute_inner_hash(&self, left: Hash, right: Hash) -> Result<Hash> {
        if self.is_leaf() {
            return Err(Error::InvalidNode("leaf has no children to hash".into()));
        }
        let mut buf = Vec::with_capacity(self.key.len() + 2 * HASH_LEN + 24);
        self.write_hash_stream(&mut buf, 0, Some([left, right]))?;
        Ok(Hash::digest(&buf))
    }

    /// Content hash of the subtree rooted here.
    ///
    /// A leaf commits to `version`, the version it was created at; an inner
    /// node's hash depends only on its height, size, key and children.
    pub fn compute_hash(&self, version: i64) -> Result<Hash> {
        let mut buf = Vec::with_capacity(self.encoded_len() + 2 * HASH_LEN);
        self.write_hash_bytes(&mut buf, version)?;
        Ok(Hash::digest(&buf))
    }
}

/// Encode a possibly absent node, failing for `None`
pub fn encode_node(node: Option<&Node>) -> Result<Vec<u8>> {
    node.ok_or_else(|| Error::Encode("cannot encode an absent node".into()))?
        .encode()
}

/// Validate a possibly absent node, failing for `None`
pub fn validate_node(node: Option<&Node>) -> Result<()> {
    node.ok_or_else(|| Error::InvalidNode("node is absent".into()))?
        .validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nk(version: i64, nonce: i32) -> NodeKey {
        NodeKey::new(version, nonce)
    }

    fn bare(key: &'static [u8], value: Option<&'static [u8]>, size: i64, height: u8) -> Node {
        Node {
            key: Bytes::from_static(key),
            value: value.map(Bytes::from_static),
            height,
            size,
            node_key: None,
            left: None,
            right: None,
            hash: None,
        }
    }

    fn fixture_inner() -> Node {
        let mut hash = [0u8; 32];
        for (i, b) in hash.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        Node {
            node_key: Some(nk(2, 1)),
            left: Some(Child::Reference(nk(1, 1))),
            right: Some(Child::Reference(nk(1, 1))),
            hash: Some(Hash::from_bytes(hash)),
            ..bare(b"key", None, 7, 3)
        }
    }

    fn fixture_leaf() -> Node {
        Node {
            node_key: Some(nk(3, 1)),
            hash: Some(
                Hash::from_hex("7f6890ca16dea6e8893d96f0a30d0a14e55559fc9b830491e3d2451c81f6d10e")
                    .unwrap(),
            ),
            ..bare(b"key", Some(b"value"), 1, 0)
        }
    }

    #[test]
    fn test_encode_nil_node() {
        assert!(matches!(encode_node(None), Err(Error::Encode(_))));
    }

    #[test]
    fn test_encode_decode_inner() {
        let node = fixture_inner();
        let bz = encode_node(Some(&node)).unwrap();
        assert_eq!(
            hex::encode(&bz),
            "03000700036b65790102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f200001000100010001"
        );
        assert_eq!(bz.len(), node.encoded_len());

        let decoded = Node::decode(nk(2, 1), &bz).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_encode_decode_leaf() {
        let node = fixture_leaf();
        let bz = node.encode().unwrap();
        assert_eq!(hex::encode(&bz), "00000100036b657976616c7565");

        // decoding recomputes the leaf hash from the node key's version
        let decoded = Node::decode(nk(3, 1), &bz).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_decode_normalizes_empty_key_and_value() {
        let node = bare(b"", Some(b""), 1, 0);
        let bz = node.encode().unwrap();
        let decoded = Node::decode(nk(1, 1), &bz).unwrap();
        assert_eq!(decoded.key, Bytes::new());
        assert_eq!(decoded.value, Some(Bytes::new()));
    }

    #[test]
    fn test_encode_rejects_uncommitted_child() {
        let leaf = Arc::new(Node::new_leaf(Bytes::from_static(b"a"), Bytes::from_static(b"1")));
        let mut inner = Node::new_inner(Bytes::from_static(b"b"), leaf.clone(), leaf);
        inner.hash = Some(Hash::digest(b"x"));
        assert!(matches!(inner.encode(), Err(Error::Encode(_))));
    }

    #[test]
    fn test_decode_malformed() {
        let bz = fixture_inner().encode().unwrap();
        assert!(matches!(Node::decode(nk(1, 1), &[]), Err(Error::MalformedNode(_))));
        assert!(Node::decode(nk(1, 1), &bz[..bz.len() - 1]).is_err());
        assert!(matches!(
            Node::decode(nk(1, 1), &bz[..20]),
            Err(Error::MalformedNode(_))
        ));

        let mut trailing = bz.clone();
        trailing.push(0);
        assert!(matches!(
            Node::decode(nk(1, 1), &trailing),
            Err(Error::MalformedNode(_))
        ));

        // height 0, size 5, key "k", value "v"
        let oversized_leaf = [0x00, 0x00, 0x05, 0x00, 0x01, b'k', b'v'];
        assert!(matches!(
            Node::decode(nk(1, 1), &oversized_leaf),
            Err(Error::MalformedNode(_))
        ));

        let mut empty_inner = bz.clone();
        assert_eq!(&empty_inner[..3], &[0x03, 0x00, 0x07]);
        empty_inner[2] = 0x00;
        assert!(matches!(
            Node::decode(nk(1, 1), &empty_inner),
            Err(Error::MalformedNode(_))
        ));
    }

    #[test]
    fn test_leaf_hash_commits_to_version() {
        let leaf = bare(b"key", Some(b"value"), 1, 0);
        assert_ne!(leaf.compute_hash(1).unwrap(), leaf.compute_hash(2).unwrap());
    }

    #[test]
    fn test_node_validate() {
        let k: &'static [u8] = b"key";
        let v: &'static [u8] = b"value";
        let child = Child::Owned(Arc::new(bare(b"child", Some(b"x"), 1, 0)));
        let keyed = |node: Node| Node {
            node_key: Some(nk(1, 1)),
            ..node
        };
        let with_children = |node: Node, left: bool, right: bool| Node {
            left: left.then_some(Child::Reference(nk(1, 1))),
            right: right.then_some(Child::Reference(nk(1, 1))),
            ..node
        };

        let cases: Vec<(&str, Option<Node>, bool)> = vec![
            ("nil node", None, false),
            ("leaf", Some(keyed(bare(k, Some(v), 1, 0))), true),
            ("leaf with empty key", Some(keyed(bare(b"", Some(v), 1, 0))), true),
            ("leaf with nil value", Some(keyed(bare(k, None, 1, 0))), false),
            ("leaf with empty value", Some(keyed(bare(k, Some(b""), 1, 0))), true),
            ("leaf without node key", Some(bare(k, Some(v), 1, 0)), false),
            (
                "leaf with version 0",
                Some(Node {
                    node_key: Some(nk(0, 1)),
                    ..bare(k, Some(v), 1, 0)
                }),
                false,
            ),
            (
                "leaf with version -1",
                Some(Node {
                    node_key: Some(nk(-1, 1)),
                    ..bare(k, Some(v), 1, 0)
                }),
                false,
            ),
            ("leaf with size 0", Some(keyed(bare(k, Some(v), 0, 0))), false),
            ("leaf with size 2", Some(keyed(bare(k, Some(v), 2, 0))), false),
            ("leaf with size -1", Some(keyed(bare(k, Some(v), -1, 0))), false),
            (
                "leaf with left node key",
                Some(with_children(keyed(bare(k, Some(v), 1, 0)), true, false)),
                false,
            ),
            (
                "leaf with left child",
                Some(Node {
                    left: Some(child.clone()),
                    ..keyed(bare(k, Some(v), 1, 0))
                }),
                false,
            ),
            (
                "leaf with right node key",
                Some(with_children(keyed(bare(k, Some(v), 1, 0)), false, true)),
                false,
            ),
            (
                "leaf with right child",
                Some(Node {
                    right: Some(child),
                    ..keyed(bare(k, Some(v), 1, 0))
                }),
                false,
            ),
            (
                "inner",
                Some(with_children(keyed(bare(k, None, 1, 1)), true, true)),
                true,
            ),
            (
                "inner with value",
                Some(with_children(keyed(bare(k, Some(v), 1, 1)), true, true)),
                false,
            ),
            (
                "inner with empty value",
                Some(with_children(keyed(bare(k, Some(b""), 1, 1)), true, true)),
                false,
            ),
            (
                "inner with left child",
                Some(with_children(keyed(bare(k, None, 1, 1)), true, false)),
                true,
            ),
            (
                "inner with right child",
                Some(with_children(keyed(bare(k, None, 1, 1)), false, true)),
                true,
            ),
            (
                "inner with no child",
                Some(keyed(bare(k, None, 1, 1))),
                false,
            ),
            (
                "inner with size 0",
                Some(with_children(keyed(bare(k, None, 0, 1)), true, true)),
                false,
            ),
            (
                "inner with height 0",
                Some(with_children(keyed(bare(k, None, 1, 0)), true, true)),
                false,
            ),
        ];

        for (desc, node, valid) in cases {
            let result = validate_node(node.as_ref());
            if valid {
                assert!(result.is_ok(), "{desc}: {result:?}");
            } else {
                assert!(matches!(result, Err(Error::InvalidNode(_))), "{desc}");
            }
        }
    }
}
