//! The content-addressed store contract backing the tries, and an in-memory
//! reference implementation.

use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::{Encodable, Header, EMPTY_STRING_CODE};
use alloy_trie::{
    nodes::{ExtensionNodeRef, LeafNodeRef, RlpNode},
    Nibbles, EMPTY_ROOT_HASH,
};
use std::{collections::HashMap, error, fmt, io};

#[derive(Debug)]
pub enum StoreError {
    /// No entry for the requested hash.
    NotFound(B256),
    /// The backing medium failed.
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(hash) => write!(f, "no entry for hash {hash}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read access to the node store shared by all tries of a state.
///
/// Implementations must be safe for concurrent reads; the diff engine only
/// ever reads.
pub trait StateStore {
    /// Raw encoding of the node with the given content hash.
    fn node(&self, hash: B256) -> Result<Bytes, StoreError>;

    /// Contract bytecode by code hash. `context` carries the caller's block or
    /// account context and may be ignored by stores that key code globally.
    fn contract_code(&self, context: B256, code_hash: B256) -> Result<Bytes, StoreError>;
}

impl<T: StateStore + ?Sized> StateStore for &T {
    fn node(&self, hash: B256) -> Result<Bytes, StoreError> {
        (**self).node(hash)
    }

    fn contract_code(&self, context: B256, code_hash: B256) -> Result<Bytes, StoreError> {
        (**self).contract_code(context, code_hash)
    }
}

/// A `HashMap`-backed node store.
///
/// Besides serving reads, it can build whole tries from `(key, value)` entries
/// so states can be assembled without a database, which is what the tests do.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: HashMap<B256, Bytes>,
    code: HashMap<B256, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records raw node bytes under their content hash and returns the hash.
    pub fn insert_node(&mut self, bytes: Vec<u8>) -> B256 {
        let hash = keccak256(&bytes);
        self.nodes.insert(hash, bytes.into());
        hash
    }

    /// Records contract bytecode under its code hash and returns the hash.
    pub fn insert_code(&mut self, code: Vec<u8>) -> B256 {
        let hash = keccak256(&code);
        self.code.insert(hash, code.into());
        hash
    }

    /// Builds the trie holding `entries` and returns its root hash.
    ///
    /// Keys are full 32-byte leaf keys; values are the raw leaf value blobs.
    /// Every node whose encoding reaches hash length is recorded in the store;
    /// shorter nodes are embedded in their parent, and the root is always
    /// recorded. Duplicate keys keep their first value.
    pub fn insert_trie(&mut self, entries: &[(B256, Vec<u8>)]) -> B256 {
        let mut sorted: Vec<(Vec<u8>, &[u8])> = entries
            .iter()
            .map(|(key, value)| (Nibbles::unpack(key).to_vec(), value.as_slice()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.dedup_by(|a, b| a.0 == b.0);
        if sorted.is_empty() {
            return EMPTY_ROOT_HASH;
        }
        let encoded = self.build_node(&sorted, 0);
        self.insert_node(encoded)
    }

    /// Encodes the subtrie holding `entries`, all of which agree on their
    /// first `depth` nibbles. Returns the node's full encoding.
    fn build_node(&mut self, entries: &[(Vec<u8>, &[u8])], depth: usize) -> Vec<u8> {
        let mut out = Vec::new();
        if let [(key, value)] = entries {
            let partial = Nibbles::from_nibbles(&key[depth..]);
            LeafNodeRef { key: &partial, value }.encode(&mut out);
            return out;
        }

        // keys are sorted, so the shared prefix of first and last covers all
        let first = &entries[0].0;
        let last = &entries[entries.len() - 1].0;
        let common = first[depth..]
            .iter()
            .zip(&last[depth..])
            .take_while(|(a, b)| a == b)
            .count();
        if common > 0 {
            let child = self.build_node(entries, depth + common);
            let child = self.reference(child);
            let key = Nibbles::from_nibbles(&first[depth..depth + common]);
            ExtensionNodeRef { key: &key, child: &child }.encode(&mut out);
            return out;
        }

        let mut children: [Option<RlpNode>; 16] = [const { None }; 16];
        let mut start = 0;
        while start < entries.len() {
            let nibble = entries[start].0[depth];
            let mut end = start;
            while end < entries.len() && entries[end].0[depth] == nibble {
                end += 1;
            }
            let child = self.build_node(&entries[start..end], depth + 1);
            children[nibble as usize] = Some(self.reference(child));
            start = end;
        }

        let mut payload_length = 1;
        for child in &children {
            payload_length += child.as_ref().map_or(1, |c| c.len());
        }
        Header { list: true, payload_length }.encode(&mut out);
        for child in &children {
            match child {
                Some(child) => out.extend_from_slice(child),
                None => out.push(EMPTY_STRING_CODE),
            }
        }
        out.push(EMPTY_STRING_CODE);
        out
    }

    /// Reference to an encoded child: recorded by hash when it does not fit
    /// inline.
    fn reference(&mut self, encoded: Vec<u8>) -> RlpNode {
        let node = RlpNode::from_rlp(&encoded);
        if node.as_hash().is_some() {
            self.insert_node(encoded);
        }
        node
    }
}

impl StateStore for MemoryStore {
    fn node(&self, hash: B256) -> Result<Bytes, StoreError> {
        self.nodes.get(&hash).cloned().ok_or(StoreError::NotFound(hash))
    }

    fn contract_code(&self, _context: B256, code_hash: B256) -> Result<Bytes, StoreError> {
        self.code.get(&code_hash).cloned().ok_or(StoreError::NotFound(code_hash))
    }
}
