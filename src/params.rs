//! Parameters controlling what a diff build emits.

use alloy_primitives::{Address, B256};
use crate::path;
use std::collections::HashSet;

/// Per-invocation diff options.
///
/// With a non-empty watched address set only matching leaves are diffed, so
/// intermediate state nodes are not emitted even when asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Emit extension and branch nodes that changed between the state roots.
    pub intermediate_state_nodes: bool,
    /// Emit extension and branch nodes inside every per-account storage diff.
    pub intermediate_storage_nodes: bool,
    /// When non-empty, only state leaves of these addresses are emitted.
    pub watched_addresses: Vec<Address>,
    /// When non-empty, only storage leaves with these keys are emitted.
    pub watched_storage_keys: Vec<B256>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intermediate_state_nodes(mut self, intermediate_state_nodes: bool) -> Self {
        self.intermediate_state_nodes = intermediate_state_nodes;
        self
    }

    pub fn with_intermediate_storage_nodes(mut self, intermediate_storage_nodes: bool) -> Self {
        self.intermediate_storage_nodes = intermediate_storage_nodes;
        self
    }

    pub fn with_watched_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.watched_addresses = addresses.into_iter().collect();
        self
    }

    pub fn with_watched_storage_keys(mut self, keys: impl IntoIterator<Item = B256>) -> Self {
        self.watched_storage_keys = keys.into_iter().collect();
        self
    }

    /// Leaf keys of the watched addresses, hashed once per invocation.
    pub(crate) fn watched_leaf_keys(&self) -> HashSet<B256> {
        self.watched_addresses.iter().map(path::address_leaf_key).collect()
    }

    /// Whether a state leaf with this key passes the address watch list.
    pub(crate) fn is_watched_address(watched: &HashSet<B256>, leaf_key: &B256) -> bool {
        watched.is_empty() || watched.contains(leaf_key)
    }

    /// Whether a storage leaf with this key passes the storage watch list.
    pub(crate) fn is_watched_storage_key(&self, leaf_key: &B256) -> bool {
        self.watched_storage_keys.is_empty() || self.watched_storage_keys.contains(leaf_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn builder_methods_chain() {
        let address = Address::repeat_byte(0xaa);
        let key = B256::repeat_byte(0xbb);
        let params = Params::new()
            .with_intermediate_state_nodes(true)
            .with_intermediate_storage_nodes(true)
            .with_watched_addresses([address])
            .with_watched_storage_keys([key]);
        assert!(params.intermediate_state_nodes);
        assert!(params.intermediate_storage_nodes);
        assert_eq!(params.watched_addresses, vec![address]);
        assert_eq!(params.watched_storage_keys, vec![key]);
    }

    #[test]
    fn empty_watch_lists_match_everything() {
        let params = Params::new();
        assert!(Params::is_watched_address(&params.watched_leaf_keys(), &B256::repeat_byte(1)));
        assert!(params.is_watched_storage_key(&B256::repeat_byte(2)));
    }

    #[test]
    fn watch_lists_match_by_hashed_key() {
        let address = Address::repeat_byte(0x0c);
        let params = Params::new().with_watched_addresses([address]);
        let watched = params.watched_leaf_keys();
        assert!(Params::is_watched_address(&watched, &keccak256(address)));
        assert!(!Params::is_watched_address(&watched, &B256::repeat_byte(7)));
    }
}
