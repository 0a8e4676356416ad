//! Lockstep walk over two tries, surfacing what only the second one has.

use crate::{cursor::TrieCursor, error::Error, node::Node, store::StateStore};
use alloy_primitives::{Bytes, B256};
use std::cmp::Ordering;

/// Yields the steps of `b`'s walk whose `(path, content)` pair has no equal in
/// `a`. Subtrees with the same hash at the same path are skipped on both
/// sides; embedded nodes, which carry no hash, are told apart by their raw
/// encoding.
///
/// One-sided: nodes only `a` has are not reported. Walk the mirrored pair for
/// those.
#[derive(Debug)]
pub struct DifferenceCursor<'s, S: ?Sized> {
    a: TrieCursor<'s, S>,
    b: TrieCursor<'s, S>,
    a_done: bool,
}

impl<'s, S: StateStore + ?Sized> DifferenceCursor<'s, S> {
    /// Positions `a` at its root; `b` drives the iteration.
    pub fn new(mut a: TrieCursor<'s, S>, b: TrieCursor<'s, S>) -> Result<Self, Error> {
        let a_done = !a.next(true)?;
        Ok(Self { a, b, a_done })
    }

    /// Advances to the next step present only in `b`. Returns `false` once
    /// `b`'s walk is exhausted.
    pub fn next(&mut self) -> Result<bool, Error> {
        // b advances by at least one step per call; a trails at or before b's
        // path so identical subtrees can be skipped the moment they line up
        if !self.b.next(true)? {
            return Ok(false);
        }
        if self.a_done {
            return Ok(true);
        }
        loop {
            match compare_steps(&self.a, &self.b) {
                Ordering::Less => {
                    if !self.a.next(true)? {
                        self.a_done = true;
                        return Ok(true);
                    }
                }
                Ordering::Greater => return Ok(true),
                Ordering::Equal => {
                    if !self.b.next(false)? {
                        return Ok(false);
                    }
                    if !self.a.next(false)? {
                        self.a_done = true;
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Content hash of the current step of `b`.
    pub fn hash(&self) -> B256 {
        self.b.hash()
    }

    /// Nibble path of the current step of `b`.
    pub fn path(&self) -> &[u8] {
        self.b.path()
    }

    /// Returns whether the current step of `b` is a stored value.
    pub fn is_value(&self) -> bool {
        self.b.is_value()
    }

    /// The current structural node of `b` and its raw encoding.
    pub fn current(&self) -> Option<(&Node, &Bytes)> {
        self.b.current()
    }
}

/// Total order aligning the two walks; `Equal` means the steps are identical
/// and their subtrees can be skipped.
fn compare_steps<S: StateStore + ?Sized>(a: &TrieCursor<'_, S>, b: &TrieCursor<'_, S>) -> Ordering {
    let ord = a.path().cmp(b.path());
    if ord != Ordering::Equal {
        return ord;
    }
    match (a.is_value(), b.is_value()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let ord = a.hash().cmp(&b.hash());
    if ord != Ordering::Equal {
        return ord;
    }
    if a.is_value() {
        return a.value_blob().cmp(&b.value_blob());
    }
    if a.hash().is_zero() {
        // embedded nodes carry no hash; their bytes are their identity
        return a.node_blob().cmp(&b.node_blob());
    }
    Ordering::Equal
}
