//! The diff engine: a synchronized walk over two state tries that classifies
//! nodes as created, updated or removed, recursing into per-account storage
//! tries and collecting newly referenced contract code.
//!
//! A build runs three passes. The first walks the new side of the difference
//! and captures changed accounts by leaf key, emitting changed intermediate
//! nodes as it goes. The second walks the old side and emits a removed marker
//! for every path no longer anchored in the new trie. The third reconciles the
//! two account maps: keys on both sides are updates (their storage tries are
//! diffed incrementally), keys only on the new side are creations (their whole
//! storage trie is walked). Accounts can move to a different path while
//! keeping their leaf key, which is why reconciliation is keyed on leaf keys
//! rather than paths.

use crate::{
    account::Account,
    cancel::CancelToken,
    cursor::TrieCursor,
    difference::DifferenceCursor,
    error::Error,
    metrics::BuilderMetrics,
    node::{Node, NodeError},
    params::Params,
    path,
    store::StateStore,
    types::{
        Args, Block, CodeAndHash, NodeType, StateNode, StateNodeSink, StateObject, StateRoots,
        StorageNode, StorageNodeSink,
    },
};
use alloy_primitives::{Bytes, B256};
use alloy_trie::EMPTY_ROOT_HASH;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A changed account leaf captured during a walk, keyed by its leaf key.
#[derive(Debug, Clone)]
struct AccountNode {
    node_path: Vec<u8>,
    node_value: Bytes,
    leaf_key: B256,
    account: Account,
}

type AccountMap = HashMap<B256, AccountNode>;
type PathSet = HashSet<Vec<u8>>;

/// Builds state diffs and full-state snapshots over a node store.
///
/// The builder holds no per-invocation state; concurrent builds over the same
/// store are fine as long as the store serves concurrent reads.
pub struct Builder<S> {
    store: S,
    cancel: CancelToken,
    metrics: BuilderMetrics,
}

impl<S> fmt::Debug for Builder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder").finish_non_exhaustive()
    }
}

impl<S: StateStore> Builder<S> {
    pub fn new(store: S) -> Self {
        Self { store, cancel: CancelToken::new(), metrics: BuilderMetrics::default() }
    }

    /// Installs a shared cancellation token checked throughout every build.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds the diff between the roots in `args`, collected into a
    /// [`StateObject`] tagged with the block context.
    pub fn build_state_diff_object(&self, args: Args, params: &Params) -> Result<StateObject, Error> {
        let mut nodes = Vec::new();
        let code_and_hashes = self.write_state_diff_object(
            args.state_roots(),
            params,
            &mut |node: StateNode| -> Result<(), Error> {
                nodes.push(node);
                Ok(())
            },
        )?;
        Ok(StateObject {
            block_number: args.block_number,
            block_hash: args.block_hash,
            nodes,
            code_and_hashes,
        })
    }

    /// Walks the whole state trie of `block` and collects every node, storage
    /// entry and contract code blob reachable from its root.
    pub fn build_state_trie_object<B: Block>(&self, block: &B) -> Result<StateObject, Error> {
        self.metrics.trie_objects_built.increment(1);
        let cursor = TrieCursor::open(&self.store, block.state_root())?;
        let mut nodes = Vec::new();
        let code_and_hashes = self.build_state_trie(cursor, &mut |node: StateNode| -> Result<(), Error> {
            nodes.push(node);
            Ok(())
        })?;
        Ok(StateObject {
            block_number: block.number(),
            block_hash: block.hash(),
            nodes,
            code_and_hashes,
        })
    }

    /// Builds the diff between two state roots, pushing every record to
    /// `sink` and returning the contract code referenced by created accounts.
    pub fn write_state_diff_object(
        &self,
        roots: StateRoots,
        params: &Params,
        sink: &mut dyn StateNodeSink,
    ) -> Result<Vec<CodeAndHash>, Error> {
        self.check_cancelled()?;
        self.metrics.diffs_built.increment(1);
        let watched_leaf_keys = params.watched_leaf_keys();
        // watching specific accounts means diffing leaves only, so a watch
        // list turns intermediate emission off
        let emit_intermediates = params.intermediate_state_nodes && watched_leaf_keys.is_empty();
        self.build_state_diff(roots, params, &watched_leaf_keys, emit_intermediates, sink)
    }

    fn build_state_diff(
        &self,
        roots: StateRoots,
        params: &Params,
        watched_leaf_keys: &HashSet<B256>,
        emit_intermediates: bool,
        sink: &mut dyn StateNodeSink,
    ) -> Result<Vec<CodeAndHash>, Error> {
        let old = TrieCursor::open(&self.store, roots.old_state_root)?;
        let new = TrieCursor::open(&self.store, roots.new_state_root)?;
        let (mut accounts_at_b, paths_at_b) =
            self.created_and_updated_state(old, new, watched_leaf_keys, emit_intermediates, sink)?;

        self.check_cancelled()?;
        let old = TrieCursor::open(&self.store, roots.old_state_root)?;
        let new = TrieCursor::open(&self.store, roots.new_state_root)?;
        let mut accounts_at_a = self.deleted_or_updated_state(old, new, &paths_at_b, sink)?;

        self.check_cancelled()?;
        // leaf keys on both sides are updates; what remains at B afterwards
        // are pure creations, and what remains at A is already covered by the
        // removed markers of the second pass
        let mut updated_keys: Vec<B256> = accounts_at_b
            .keys()
            .filter(|key| accounts_at_a.contains_key(*key))
            .copied()
            .collect();
        updated_keys.sort_unstable();

        self.build_account_updates(
            &mut accounts_at_b,
            &mut accounts_at_a,
            &updated_keys,
            params,
            sink,
        )?;

        self.check_cancelled()?;
        self.build_account_creations(accounts_at_b, params, sink)
    }

    /// First pass: everything that exists in a different state at B than at A.
    /// Changed accounts are captured by leaf key; changed intermediate nodes
    /// are emitted right away when asked for. Every changed path is recorded.
    fn created_and_updated_state(
        &self,
        old: TrieCursor<'_, S>,
        new: TrieCursor<'_, S>,
        watched_leaf_keys: &HashSet<B256>,
        emit_intermediates: bool,
        sink: &mut dyn StateNodeSink,
    ) -> Result<(AccountMap, PathSet), Error> {
        let mut accounts = AccountMap::new();
        let mut paths = PathSet::new();
        let mut it = DifferenceCursor::new(old, new)?;
        while it.next()? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            let Some((node, raw)) = it.current() else { continue };
            match node {
                Node::Leaf { partial_path, value } => {
                    let (leaf_key, account) = decode_account_leaf(&node_path, partial_path, value)?;
                    if Params::is_watched_address(watched_leaf_keys, &leaf_key) {
                        accounts.insert(
                            leaf_key,
                            AccountNode {
                                node_path: node_path.clone(),
                                node_value: raw.clone(),
                                leaf_key,
                                account,
                            },
                        );
                    }
                }
                Node::Extension { .. } | Node::Branch { .. } => {
                    if emit_intermediates {
                        let record = StateNode {
                            node_type: node.node_type(),
                            path: path::to_nibbles(&node_path),
                            node_value: raw.clone(),
                            leaf_key: None,
                            storage_nodes: Vec::new(),
                        };
                        self.emit_state(sink, record)?;
                    }
                }
            }
            paths.insert(node_path);
        }
        Ok((accounts, paths))
    }

    /// Second pass, over the mirrored difference: every path emptied at B gets
    /// a removed marker, and accounts that existed at A are captured by leaf
    /// key for the reconciliation pass.
    fn deleted_or_updated_state(
        &self,
        old: TrieCursor<'_, S>,
        new: TrieCursor<'_, S>,
        paths_at_b: &PathSet,
        sink: &mut dyn StateNodeSink,
    ) -> Result<AccountMap, Error> {
        let mut accounts = AccountMap::new();
        let mut it = DifferenceCursor::new(new, old)?;
        while it.next()? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            // a path that anchors nothing at B means the subtree was deleted
            // or moved; signal it regardless of the node's kind
            if !paths_at_b.contains(&node_path) {
                let record = StateNode {
                    node_type: NodeType::Removed,
                    path: path::to_nibbles(&node_path),
                    node_value: Bytes::new(),
                    leaf_key: None,
                    storage_nodes: Vec::new(),
                };
                self.emit_state(sink, record)?;
            }
            if let Some((Node::Leaf { partial_path, value }, raw)) = it.current() {
                let (leaf_key, account) = decode_account_leaf(&node_path, partial_path, value)?;
                accounts.insert(
                    leaf_key,
                    AccountNode { node_path, node_value: raw.clone(), leaf_key, account },
                );
            }
        }
        Ok(accounts)
    }

    /// Third pass, updates: for every leaf key present on both sides, diff the
    /// account's storage incrementally and emit the B-side leaf. Consumed
    /// entries leave both maps.
    fn build_account_updates(
        &self,
        creations: &mut AccountMap,
        deletions: &mut AccountMap,
        updated_keys: &[B256],
        params: &Params,
        sink: &mut dyn StateNodeSink,
    ) -> Result<(), Error> {
        for key in updated_keys {
            self.check_cancelled()?;
            let (Some(created), Some(deleted)) = (creations.remove(key), deletions.remove(key))
            else {
                continue;
            };
            let mut storage_nodes = Vec::new();
            self.build_storage_nodes_incremental(
                deleted.account.storage_root,
                created.account.storage_root,
                params,
                &mut |node: StorageNode| -> Result<(), Error> {
                    storage_nodes.push(node);
                    Ok(())
                },
            )?;
            let record = StateNode {
                node_type: NodeType::Leaf,
                path: path::to_nibbles(&created.node_path),
                node_value: created.node_value,
                leaf_key: Some(created.leaf_key),
                storage_nodes,
            };
            self.emit_state(sink, record)?;
        }
        Ok(())
    }

    /// Third pass, creations: emit what remains at B with its whole storage
    /// trie attached, and collect the code of contract accounts.
    fn build_account_creations(
        &self,
        mut accounts: AccountMap,
        params: &Params,
        sink: &mut dyn StateNodeSink,
    ) -> Result<Vec<CodeAndHash>, Error> {
        let mut code_and_hashes = Vec::new();
        let mut keys: Vec<B256> = accounts.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            self.check_cancelled()?;
            let Some(created) = accounts.remove(&key) else { continue };
            let mut storage_nodes = Vec::new();
            self.build_storage_nodes_eventual(
                created.account.storage_root,
                params,
                &mut |node: StorageNode| -> Result<(), Error> {
                    storage_nodes.push(node);
                    Ok(())
                },
            )?;
            if created.account.has_code() {
                let code = self
                    .store
                    .contract_code(B256::ZERO, created.account.code_hash)
                    .map_err(|e| Error::store(&created.node_path, e))?;
                code_and_hashes.push(CodeAndHash { hash: created.account.code_hash, code });
            }
            let record = StateNode {
                node_type: NodeType::Leaf,
                path: path::to_nibbles(&created.node_path),
                node_value: created.node_value,
                leaf_key: Some(created.leaf_key),
                storage_nodes,
            };
            self.emit_state(sink, record)?;
        }
        Ok(code_and_hashes)
    }

    /// Walks an account's whole storage trie, for accounts that have no
    /// previous state to diff against.
    fn build_storage_nodes_eventual(
        &self,
        storage_root: B256,
        params: &Params,
        sink: &mut dyn StorageNodeSink,
    ) -> Result<(), Error> {
        if storage_root == EMPTY_ROOT_HASH {
            return Ok(());
        }
        debug!("walking full storage trie at {storage_root}");
        let cursor = TrieCursor::open(&self.store, storage_root)?;
        self.build_storage_nodes_from_cursor(cursor, params, sink)
    }

    fn build_storage_nodes_from_cursor(
        &self,
        mut it: TrieCursor<'_, S>,
        params: &Params,
        sink: &mut dyn StorageNodeSink,
    ) -> Result<(), Error> {
        while it.next(true)? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            let Some((node, raw)) = it.current() else { continue };
            match node {
                Node::Leaf { partial_path, .. } => {
                    let leaf_key = storage_leaf_key(&node_path, partial_path)?;
                    if params.is_watched_storage_key(&leaf_key) {
                        let record = StorageNode {
                            node_type: NodeType::Leaf,
                            path: path::to_nibbles(&node_path),
                            node_value: raw.clone(),
                            leaf_key: Some(leaf_key),
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
                Node::Extension { .. } | Node::Branch { .. } => {
                    if params.intermediate_storage_nodes {
                        let record = StorageNode {
                            node_type: node.node_type(),
                            path: path::to_nibbles(&node_path),
                            node_value: raw.clone(),
                            leaf_key: None,
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Diffs an account's storage trie between its old and new roots.
    fn build_storage_nodes_incremental(
        &self,
        old_root: B256,
        new_root: B256,
        params: &Params,
        sink: &mut dyn StorageNodeSink,
    ) -> Result<(), Error> {
        if new_root == old_root {
            return Ok(());
        }
        debug!("diffing storage tries, old {old_root}, new {new_root}");
        let old = TrieCursor::open(&self.store, old_root)?;
        let new = TrieCursor::open(&self.store, new_root)?;
        let paths_at_b = self.created_and_updated_storage(old, new, params, sink)?;

        let old = TrieCursor::open(&self.store, old_root)?;
        let new = TrieCursor::open(&self.store, new_root)?;
        self.deleted_or_updated_storage(old, new, &paths_at_b, params, sink)
    }

    fn created_and_updated_storage(
        &self,
        old: TrieCursor<'_, S>,
        new: TrieCursor<'_, S>,
        params: &Params,
        sink: &mut dyn StorageNodeSink,
    ) -> Result<PathSet, Error> {
        let mut paths = PathSet::new();
        let mut it = DifferenceCursor::new(old, new)?;
        while it.next()? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            let Some((node, raw)) = it.current() else { continue };
            match node {
                Node::Leaf { partial_path, .. } => {
                    let leaf_key = storage_leaf_key(&node_path, partial_path)?;
                    if params.is_watched_storage_key(&leaf_key) {
                        let record = StorageNode {
                            node_type: NodeType::Leaf,
                            path: path::to_nibbles(&node_path),
                            node_value: raw.clone(),
                            leaf_key: Some(leaf_key),
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
                Node::Extension { .. } | Node::Branch { .. } => {
                    if params.intermediate_storage_nodes {
                        let record = StorageNode {
                            node_type: node.node_type(),
                            path: path::to_nibbles(&node_path),
                            node_value: raw.clone(),
                            leaf_key: None,
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
            }
            paths.insert(node_path);
        }
        Ok(paths)
    }

    /// Storage nodes present at A whose path anchors nothing at B anymore get
    /// a removed marker; nodes whose path was re-filled at B were already
    /// covered by the first storage pass.
    fn deleted_or_updated_storage(
        &self,
        old: TrieCursor<'_, S>,
        new: TrieCursor<'_, S>,
        paths_at_b: &PathSet,
        params: &Params,
        sink: &mut dyn StorageNodeSink,
    ) -> Result<(), Error> {
        let mut it = DifferenceCursor::new(new, old)?;
        while it.next()? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            if paths_at_b.contains(&node_path) {
                continue;
            }
            let Some((node, _)) = it.current() else { continue };
            match node {
                Node::Leaf { partial_path, .. } => {
                    // the removal is keyed on the old leaf's key; the new trie
                    // has nothing at this path to check against
                    let leaf_key = storage_leaf_key(&node_path, partial_path)?;
                    if params.is_watched_storage_key(&leaf_key) {
                        let record = StorageNode {
                            node_type: NodeType::Removed,
                            path: path::to_nibbles(&node_path),
                            node_value: Bytes::new(),
                            leaf_key: None,
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
                Node::Extension { .. } | Node::Branch { .. } => {
                    if params.intermediate_storage_nodes {
                        let record = StorageNode {
                            node_type: NodeType::Removed,
                            path: path::to_nibbles(&node_path),
                            node_value: Bytes::new(),
                            leaf_key: None,
                        };
                        self.emit_storage(sink, record)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Degenerate single-trie walk behind
    /// [`build_state_trie_object`](Self::build_state_trie_object): every
    /// structural node is emitted, every account's storage trie is walked in
    /// full, and contract code is collected.
    fn build_state_trie(
        &self,
        mut it: TrieCursor<'_, S>,
        sink: &mut dyn StateNodeSink,
    ) -> Result<Vec<CodeAndHash>, Error> {
        let mut code_and_hashes = Vec::new();
        let snapshot_params = Params::new().with_intermediate_storage_nodes(true);
        while it.next(true)? {
            self.check_cancelled()?;
            if it.is_value() || it.hash().is_zero() {
                continue;
            }
            let node_path = it.path().to_vec();
            let Some((node, raw)) = it.current() else { continue };
            match node {
                Node::Leaf { partial_path, value } => {
                    let (leaf_key, account) = decode_account_leaf(&node_path, partial_path, value)?;
                    let mut storage_nodes = Vec::new();
                    self.build_storage_nodes_eventual(
                        account.storage_root,
                        &snapshot_params,
                        &mut |node: StorageNode| -> Result<(), Error> {
                            storage_nodes.push(node);
                            Ok(())
                        },
                    )?;
                    if account.has_code() {
                        let code = self
                            .store
                            .contract_code(B256::ZERO, account.code_hash)
                            .map_err(|e| Error::store(&node_path, e))?;
                        code_and_hashes.push(CodeAndHash { hash: account.code_hash, code });
                    }
                    let record = StateNode {
                        node_type: NodeType::Leaf,
                        path: path::to_nibbles(&node_path),
                        node_value: raw.clone(),
                        leaf_key: Some(leaf_key),
                        storage_nodes,
                    };
                    self.emit_state(sink, record)?;
                }
                Node::Extension { .. } | Node::Branch { .. } => {
                    let record = StateNode {
                        node_type: node.node_type(),
                        path: path::to_nibbles(&node_path),
                        node_value: raw.clone(),
                        leaf_key: None,
                        storage_nodes: Vec::new(),
                    };
                    self.emit_state(sink, record)?;
                }
            }
        }
        Ok(code_and_hashes)
    }

    fn emit_state(&self, sink: &mut dyn StateNodeSink, node: StateNode) -> Result<(), Error> {
        match node.node_type {
            NodeType::Removed => self.metrics.removed_nodes_emitted.increment(1),
            _ => self.metrics.state_nodes_emitted.increment(1),
        }
        sink.emit(node)
    }

    fn emit_storage(&self, sink: &mut dyn StorageNodeSink, node: StorageNode) -> Result<(), Error> {
        match node.node_type {
            NodeType::Removed => self.metrics.removed_nodes_emitted.increment(1),
            _ => self.metrics.storage_nodes_emitted.increment(1),
        }
        sink.emit(node)
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Decodes a state leaf into its full leaf key and account record.
fn decode_account_leaf(
    node_path: &[u8],
    partial_path: &[u8],
    value: &[u8],
) -> Result<(B256, Account), Error> {
    let leaf_key = path::leaf_key(node_path, partial_path).ok_or_else(|| {
        Error::node_decode(node_path, NodeError::LeafKey(node_path.len() + partial_path.len()))
    })?;
    let account = alloy_rlp::decode_exact::<Account>(value)
        .map_err(|e| Error::account_decode(node_path, e))?;
    Ok((leaf_key, account))
}

/// Assembles a storage leaf's full key.
fn storage_leaf_key(node_path: &[u8], partial_path: &[u8]) -> Result<B256, Error> {
    path::leaf_key(node_path, partial_path).ok_or_else(|| {
        Error::node_decode(node_path, NodeError::LeafKey(node_path.len() + partial_path.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use alloy_primitives::{keccak256, Address, U256};

    fn account_entry(address: Address, balance: u64) -> (B256, Vec<u8>) {
        let account = Account { balance: U256::from(balance), ..Account::empty() };
        (keccak256(address), alloy_rlp::encode(&account))
    }

    #[test]
    fn equal_roots_emit_nothing() {
        let mut store = MemoryStore::new();
        let root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 100)]);
        let builder = Builder::new(&store);
        let mut emitted = 0usize;
        let code = builder
            .write_state_diff_object(
                StateRoots { old_state_root: root, new_state_root: root },
                &Params::new().with_intermediate_state_nodes(true),
                &mut |_node: StateNode| -> Result<(), Error> {
                    emitted += 1;
                    Ok(())
                },
            )
            .expect("diff of equal roots");
        assert_eq!(emitted, 0);
        assert!(code.is_empty());
    }

    #[test]
    fn cancelled_token_aborts() {
        let mut store = MemoryStore::new();
        let old_root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 100)]);
        let new_root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 200)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let builder = Builder::new(&store).with_cancel_token(cancel);
        let result = builder.write_state_diff_object(
            StateRoots { old_state_root: old_root, new_state_root: new_root },
            &Params::new(),
            &mut |_node: StateNode| -> Result<(), Error> { Ok(()) },
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn sink_error_propagates() {
        let mut store = MemoryStore::new();
        let old_root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 100)]);
        let new_root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 200)]);
        let builder = Builder::new(&store);
        let result = builder.write_state_diff_object(
            StateRoots { old_state_root: old_root, new_state_root: new_root },
            &Params::new(),
            &mut |_node: StateNode| -> Result<(), Error> { Err(Error::Sink("sink is full".into())) },
        );
        assert!(matches!(result, Err(Error::Sink(_))));
    }

    #[test]
    fn missing_old_root_fails() {
        let mut store = MemoryStore::new();
        let new_root = store.insert_trie(&[account_entry(Address::repeat_byte(1), 100)]);
        let builder = Builder::new(&store);
        let missing = B256::repeat_byte(0x99);
        let result = builder.write_state_diff_object(
            StateRoots { old_state_root: missing, new_state_root: new_root },
            &Params::new(),
            &mut |_node: StateNode| -> Result<(), Error> { Ok(()) },
        );
        assert!(matches!(result, Err(Error::MissingRoot(root)) if root == missing));
    }
}
