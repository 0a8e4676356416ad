//! The account record stored at a state-trie leaf.

use alloy_primitives::{B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};

/// An account as RLP-encoded in the state trie:
/// `[nonce, balance, storage_root, code_hash]`.
#[derive(Debug, Clone, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl Account {
    pub const fn new(nonce: u64, balance: U256, storage_root: B256, code_hash: B256) -> Self {
        Self { nonce, balance, storage_root, code_hash }
    }

    /// An account with zero nonce and balance, no storage and no code.
    pub const fn empty() -> Self {
        Self::new(0, U256::ZERO, EMPTY_ROOT_HASH, KECCAK_EMPTY)
    }

    /// Returns whether the account references contract code.
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }

    /// Returns whether the account has a non-empty storage trie.
    pub fn has_storage(&self) -> bool {
        self.storage_root != EMPTY_ROOT_HASH
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::empty()
    }
}
