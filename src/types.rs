//! Diff records, builder arguments and results, and the output sink contracts.

use crate::error::Error;
use alloy_primitives::{Bytes, B256};
use alloy_trie::Nibbles;
use std::fmt;

/// Kind tag of an emitted diff record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Branch,
    Extension,
    Leaf,
    /// A node present at this path in the old trie and gone in the new one.
    Removed,
}

impl NodeType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Extension => "extension",
            Self::Leaf => "leaf",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state-trie diff record.
///
/// `node_value` is the node's raw encoding (empty for [`NodeType::Removed`]),
/// `leaf_key` is set on leaves only, and `storage_nodes` carries the storage
/// sub-diff of an account leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNode {
    pub node_type: NodeType,
    pub path: Nibbles,
    pub node_value: Bytes,
    pub leaf_key: Option<B256>,
    pub storage_nodes: Vec<StorageNode>,
}

/// A single storage-trie diff record attached to an account leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNode {
    pub node_type: NodeType,
    pub path: Nibbles,
    pub node_value: Bytes,
    pub leaf_key: Option<B256>,
}

/// Contract bytecode newly referenced by a diff, keyed by its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAndHash {
    pub hash: B256,
    pub code: Bytes,
}

/// The two state roots a diff is built between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRoots {
    pub old_state_root: B256,
    pub new_state_root: B256,
}

/// Block context for a diff build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    pub old_state_root: B256,
    pub new_state_root: B256,
    pub block_number: u64,
    pub block_hash: B256,
}

impl Args {
    pub const fn state_roots(&self) -> StateRoots {
        StateRoots {
            old_state_root: self.old_state_root,
            new_state_root: self.new_state_root,
        }
    }
}

/// A fully collected diff or snapshot, tagged with its block context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateObject {
    pub block_number: u64,
    pub block_hash: B256,
    pub nodes: Vec<StateNode>,
    pub code_and_hashes: Vec<CodeAndHash>,
}

/// Minimal view of a block, for building a snapshot of its whole state trie.
pub trait Block {
    fn number(&self) -> u64;
    fn hash(&self) -> B256;
    fn state_root(&self) -> B256;
}

/// Push-style receiver for state diff records.
///
/// Records arrive in traversal order; returning an error aborts the build and
/// the error is handed back to the caller unchanged.
pub trait StateNodeSink {
    fn emit(&mut self, node: StateNode) -> Result<(), Error>;
}

impl<F> StateNodeSink for F
where
    F: FnMut(StateNode) -> Result<(), Error>,
{
    fn emit(&mut self, node: StateNode) -> Result<(), Error> {
        self(node)
    }
}

/// Push-style receiver for the storage records of a single account.
pub trait StorageNodeSink {
    fn emit(&mut self, node: StorageNode) -> Result<(), Error>;
}

impl<F> StorageNodeSink for F
where
    F: FnMut(StorageNode) -> Result<(), Error>,
{
    fn emit(&mut self, node: StorageNode) -> Result<(), Error> {
        self(node)
    }
}
