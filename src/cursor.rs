//! Pre-order traversal over one trie of the shared node store.
//!
//! The cursor walks depth-first, left-to-right: branch children in index
//! order, an extension's child right after the extension. Besides structural
//! nodes it also stops on stored values, with the leaf terminator appended to
//! their path, so two walks line up step-for-step in the difference cursor.

use crate::{
    error::Error,
    node::{Node, NodeRef},
    path::TERMINATOR,
    store::StateStore,
};
use alloy_primitives::{Bytes, B256};
use alloy_trie::EMPTY_ROOT_HASH;

/// What a cursor step landed on.
#[derive(Debug, Clone)]
enum Step {
    /// A structural node, decoded, with its raw encoding.
    Node { node: Node, raw: Bytes },
    /// A stored value.
    Value { blob: Bytes },
}

#[derive(Debug, Clone)]
struct Frame {
    /// Content hash of the node; zero for embedded nodes and values.
    hash: B256,
    step: Step,
    /// Highest child slot handed out so far; -1 before the first.
    index: i32,
    /// Path length to restore when this frame pops.
    parent_path_len: usize,
}

/// A single-pass pre-order cursor over the trie rooted at `root`.
#[derive(Debug)]
pub struct TrieCursor<'s, S: ?Sized> {
    store: &'s S,
    root: B256,
    root_node: Option<(Node, Bytes)>,
    stack: Vec<Frame>,
    path: Vec<u8>,
    started: bool,
}

impl<'s, S: StateStore + ?Sized> TrieCursor<'s, S> {
    /// Opens a cursor over the trie at `root`.
    ///
    /// The empty root yields an empty walk; any other root must resolve in the
    /// store or the cursor fails to open with [`Error::MissingRoot`].
    pub fn open(store: &'s S, root: B256) -> Result<Self, Error> {
        let root_node = if root == EMPTY_ROOT_HASH || root.is_zero() {
            None
        } else {
            let raw = store.node(root).map_err(|_| Error::MissingRoot(root))?;
            let node = Node::decode(&raw).map_err(|e| Error::node_decode(&[], e))?;
            Some((node, raw))
        };
        Ok(Self { store, root, root_node, stack: Vec::new(), path: Vec::new(), started: false })
    }

    /// Advances to the next step of the walk; `descend: false` skips the
    /// current node's subtree. Returns `false` once the walk is exhausted.
    pub fn next(&mut self, descend: bool) -> Result<bool, Error> {
        if !self.started {
            self.started = true;
            let Some((node, raw)) = self.root_node.take() else { return Ok(false) };
            self.stack.push(Frame {
                hash: self.root,
                step: Step::Node { node, raw },
                index: -1,
                parent_path_len: 0,
            });
            return Ok(true);
        }
        if !descend {
            self.pop();
        }
        while !self.stack.is_empty() {
            if self.push_next_child()? {
                return Ok(true);
            }
            self.pop();
        }
        Ok(false)
    }

    /// Content hash of the current step; zero for embedded nodes and values.
    pub fn hash(&self) -> B256 {
        self.stack.last().map_or(B256::ZERO, |frame| frame.hash)
    }

    /// Nibble path from the root to the current step.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Returns whether the current step is a stored value rather than a
    /// structural node.
    pub fn is_value(&self) -> bool {
        matches!(self.stack.last(), Some(Frame { step: Step::Value { .. }, .. }))
    }

    /// The current value blob, when the step is a value.
    pub fn value_blob(&self) -> Option<&Bytes> {
        match self.stack.last() {
            Some(Frame { step: Step::Value { blob }, .. }) => Some(blob),
            _ => None,
        }
    }

    /// The current structural node and its raw encoding.
    pub fn current(&self) -> Option<(&Node, &Bytes)> {
        match self.stack.last() {
            Some(Frame { step: Step::Node { node, raw }, .. }) => Some((node, raw)),
            _ => None,
        }
    }

    /// Raw encoding of the current structural node.
    pub fn node_blob(&self) -> Option<&Bytes> {
        self.current().map(|(_, raw)| raw)
    }

    fn pop(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.path.truncate(frame.parent_path_len);
        }
    }

    /// Pushes the current top's next unvisited child, if any.
    fn push_next_child(&mut self) -> Result<bool, Error> {
        enum Plan {
            Value { suffix: Vec<u8>, blob: Bytes, index: i32 },
            Child { suffix: Vec<u8>, child: NodeRef, index: i32 },
            Exhausted,
        }

        let top = self.stack.len() - 1;
        let frame = &self.stack[top];
        let plan = match &frame.step {
            Step::Value { .. } => Plan::Exhausted,
            Step::Node { node, .. } => match node {
                Node::Leaf { partial_path, value } if frame.index < 0 => Plan::Value {
                    suffix: partial_path.clone(),
                    blob: value.clone(),
                    index: 0,
                },
                Node::Extension { partial_path, child } if frame.index < 0 => Plan::Child {
                    suffix: partial_path.clone(),
                    child: child.clone(),
                    index: 0,
                },
                Node::Branch { children, value } => {
                    let mut plan = Plan::Exhausted;
                    for index in (frame.index + 1).max(0)..=16 {
                        if index < 16 {
                            if let Some(child) = &children[index as usize] {
                                plan = Plan::Child {
                                    suffix: vec![index as u8],
                                    child: child.clone(),
                                    index,
                                };
                                break;
                            }
                        } else if let Some(blob) = value {
                            plan = Plan::Value {
                                suffix: vec![TERMINATOR],
                                blob: blob.clone(),
                                index,
                            };
                            break;
                        }
                    }
                    plan
                }
                _ => Plan::Exhausted,
            },
        };

        match plan {
            Plan::Exhausted => Ok(false),
            Plan::Value { suffix, blob, index } => {
                self.stack[top].index = index;
                let parent_path_len = self.path.len();
                self.path.extend_from_slice(&suffix);
                self.stack.push(Frame {
                    hash: B256::ZERO,
                    step: Step::Value { blob },
                    index: -1,
                    parent_path_len,
                });
                Ok(true)
            }
            Plan::Child { suffix, child, index } => {
                self.stack[top].index = index;
                let parent_path_len = self.path.len();
                self.path.extend_from_slice(&suffix);
                let frame = self.resolve(&child, parent_path_len)?;
                self.stack.push(frame);
                Ok(true)
            }
        }
    }

    /// Resolves a child reference into a frame, fetching hashed children from
    /// the store.
    fn resolve(&self, child: &NodeRef, parent_path_len: usize) -> Result<Frame, Error> {
        let (hash, raw) = match child {
            NodeRef::Hash(hash) => {
                let raw = self.store.node(*hash).map_err(|e| Error::store(&self.path, e))?;
                (*hash, raw)
            }
            NodeRef::Embedded(raw) => (B256::ZERO, raw.clone()),
        };
        let node = Node::decode(&raw).map_err(|e| Error::node_decode(&self.path, e))?;
        Ok(Frame { hash, step: Step::Node { node, raw }, index: -1, parent_path_len })
    }
}
