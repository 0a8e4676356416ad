//! Decoding of raw trie node bytes.
//!
//! A stored node is an RLP list of either two elements (leaf or extension,
//! told apart by the hex-prefix flag of the first element) or seventeen
//! elements (branch). Child positions hold the keccak hash of the child's
//! encoding, or the encoding itself when it is shorter than a hash.

use crate::{path, types::NodeType};
use alloy_primitives::{Bytes, B256};
use alloy_rlp::Header;
use std::{error, fmt};

/// Reference to a child inside an encoded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// Keccak-256 hash of the child's encoding.
    Hash(B256),
    /// The child's encoding, inlined because it is shorter than a hash.
    Embedded(Bytes),
}

impl NodeRef {
    /// The content hash of the referenced child; zero for embedded children.
    pub fn hash(&self) -> B256 {
        match self {
            Self::Hash(hash) => *hash,
            Self::Embedded(_) => B256::ZERO,
        }
    }
}

/// A decoded trie node.
///
/// Short-node key fragments are hex-expanded; a leaf's fragment keeps the
/// trailing terminator nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf { partial_path: Vec<u8>, value: Bytes },
    Extension { partial_path: Vec<u8>, child: NodeRef },
    Branch { children: [Option<NodeRef>; 16], value: Option<Bytes> },
}

#[derive(Debug)]
pub enum NodeError {
    /// The bytes are not well-formed RLP.
    Rlp(alloy_rlp::Error),
    /// The list has neither two nor seventeen elements.
    ElementCount(usize),
    /// The hex-prefix flag of a two-element node matches no known kind.
    UnexpectedNodeType(u8),
    /// A child slot holds a string of an impossible length.
    ChildReference(usize),
    /// A leaf's combined key does not name a full 32-byte leaf key.
    LeafKey(usize),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rlp(e) => write!(f, "invalid node rlp: {e}"),
            Self::ElementCount(n) => write!(f, "node list has {n} elements"),
            Self::UnexpectedNodeType(flag) => write!(f, "unexpected node type flag {flag:#x}"),
            Self::ChildReference(len) => write!(f, "child reference of {len} bytes"),
            Self::LeafKey(len) => write!(f, "leaf key of {len} nibbles"),
        }
    }
}

impl error::Error for NodeError {}

impl From<alloy_rlp::Error> for NodeError {
    fn from(e: alloy_rlp::Error) -> Self {
        Self::Rlp(e)
    }
}

/// One raw element of a node's RLP list.
struct Element<'a> {
    /// The element's full encoding, header included.
    raw: &'a [u8],
    /// The element's payload.
    payload: &'a [u8],
    list: bool,
}

fn split_elements(mut buf: &[u8]) -> Result<Vec<Element<'_>>, NodeError> {
    let mut elements = Vec::new();
    while !buf.is_empty() {
        let start = buf;
        let header = Header::decode(&mut buf)?;
        if buf.len() < header.payload_length {
            return Err(NodeError::Rlp(alloy_rlp::Error::InputTooShort));
        }
        let payload = &buf[..header.payload_length];
        buf = &buf[header.payload_length..];
        let raw = &start[..start.len() - buf.len()];
        elements.push(Element { raw, payload, list: header.list });
    }
    Ok(elements)
}

fn child_ref(element: &Element<'_>) -> Result<Option<NodeRef>, NodeError> {
    if element.list {
        return Ok(Some(NodeRef::Embedded(Bytes::copy_from_slice(element.raw))));
    }
    match element.payload.len() {
        0 => Ok(None),
        32 => Ok(Some(NodeRef::Hash(B256::from_slice(element.payload)))),
        n => Err(NodeError::ChildReference(n)),
    }
}

impl Node {
    /// Decodes the raw encoding of a stored node.
    pub fn decode(buf: &[u8]) -> Result<Self, NodeError> {
        let payload = Header::decode_bytes(&mut &buf[..], true)?;
        let elements = split_elements(payload)?;
        match elements.len() {
            17 => {
                let mut children: [Option<NodeRef>; 16] = [const { None }; 16];
                for (slot, element) in children.iter_mut().zip(&elements) {
                    *slot = child_ref(element)?;
                }
                let value = &elements[16];
                if value.list {
                    return Err(NodeError::Rlp(alloy_rlp::Error::UnexpectedList));
                }
                let value = (!value.payload.is_empty())
                    .then(|| Bytes::copy_from_slice(value.payload));
                Ok(Self::Branch { children, value })
            }
            2 => {
                let key = &elements[0];
                if key.list || key.payload.is_empty() {
                    return Err(NodeError::Rlp(alloy_rlp::Error::UnexpectedList));
                }
                let flag = key.payload[0] >> 4;
                let partial_path = path::compact_to_hex(key.payload);
                match flag {
                    0 | 1 => {
                        let child = child_ref(&elements[1])?
                            .ok_or(NodeError::ChildReference(0))?;
                        Ok(Self::Extension { partial_path, child })
                    }
                    2 | 3 => {
                        let value = &elements[1];
                        if value.list {
                            return Err(NodeError::Rlp(alloy_rlp::Error::UnexpectedList));
                        }
                        Ok(Self::Leaf {
                            partial_path,
                            value: Bytes::copy_from_slice(value.payload),
                        })
                    }
                    flag => Err(NodeError::UnexpectedNodeType(flag)),
                }
            }
            n => Err(NodeError::ElementCount(n)),
        }
    }

    /// The kind tag this node is reported under.
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Leaf { .. } => NodeType::Leaf,
            Self::Extension { .. } => NodeType::Extension,
            Self::Branch { .. } => NodeType::Branch,
        }
    }

}

/// Classifies raw node bytes without keeping the decoded node.
pub fn classify(buf: &[u8]) -> Result<NodeType, NodeError> {
    Node::decode(buf).map(|node| node.node_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::TERMINATOR;
    use alloy_primitives::hex;
    use alloy_rlp::{Encodable, EMPTY_STRING_CODE};

    fn encode_short(compact_key: &[u8], second: &[u8], second_is_raw: bool) -> Vec<u8> {
        let mut payload = Vec::new();
        compact_key.encode(&mut payload);
        if second_is_raw {
            payload.extend_from_slice(second);
        } else {
            second.encode(&mut payload);
        }
        let mut out = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn decode_leaf() {
        let encoded = encode_short(&hex!("3f1cb8"), &hex!("76657262"), false);
        let node = Node::decode(&encoded).expect("leaf should decode");
        assert_eq!(
            node,
            Node::Leaf {
                partial_path: vec![15, 1, 12, 11, 8, TERMINATOR],
                value: Bytes::from_static(&hex!("76657262")),
            }
        );
        assert_eq!(node.node_type(), NodeType::Leaf);
    }

    #[test]
    fn decode_extension_with_hash_child() {
        let child = B256::repeat_byte(0xcd);
        let encoded = encode_short(&hex!("1123"), child.as_slice(), false);
        let node = Node::decode(&encoded).expect("extension should decode");
        assert_eq!(
            node,
            Node::Extension { partial_path: vec![1, 2, 3], child: NodeRef::Hash(child) }
        );
        assert_eq!(node.node_type(), NodeType::Extension);
    }

    #[test]
    fn decode_extension_with_embedded_child() {
        let embedded = encode_short(&hex!("20"), &hex!("2a"), false);
        assert!(embedded.len() < 32);
        let encoded = encode_short(&hex!("00"), &embedded, true);
        let node = Node::decode(&encoded).expect("extension should decode");
        match node {
            Node::Extension { partial_path, child: NodeRef::Embedded(raw) } => {
                assert!(partial_path.is_empty());
                assert_eq!(raw.as_ref(), embedded.as_slice());
                assert_eq!(NodeRef::Embedded(raw).hash(), B256::ZERO);
            }
            other => panic!("expected embedded extension, got {other:?}"),
        }
    }

    #[test]
    fn decode_branch() {
        let child = B256::repeat_byte(0xab);
        let mut payload = Vec::new();
        for index in 0..16 {
            if index == 4 {
                child.as_slice().encode(&mut payload);
            } else {
                payload.push(EMPTY_STRING_CODE);
            }
        }
        payload.push(EMPTY_STRING_CODE);
        let mut encoded = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut encoded);
        encoded.extend_from_slice(&payload);

        let node = Node::decode(&encoded).expect("branch should decode");
        match node {
            Node::Branch { children, value } => {
                assert_eq!(children[4], Some(NodeRef::Hash(child)));
                assert_eq!(children.iter().filter(|c| c.is_some()).count(), 1);
                assert_eq!(value, None);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn classify_rejects_unknown_prefix() {
        let encoded = encode_short(&hex!("45"), &hex!("01"), false);
        match classify(&encoded) {
            Err(NodeError::UnexpectedNodeType(4)) => {}
            other => panic!("expected unexpected-node-type error, got {other:?}"),
        }
    }

    #[test]
    fn classify_rejects_bad_element_count() {
        let mut payload = Vec::new();
        for _ in 0..3 {
            hex!("01").as_slice().encode(&mut payload);
        }
        let mut encoded = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut encoded);
        encoded.extend_from_slice(&payload);
        match classify(&encoded) {
            Err(NodeError::ElementCount(3)) => {}
            other => panic!("expected element-count error, got {other:?}"),
        }
    }

    #[test]
    fn classify_rejects_non_list() {
        match classify(&hex!("83010203")) {
            Err(NodeError::Rlp(_)) => {}
            other => panic!("expected rlp error, got {other:?}"),
        }
    }
}
