//! Crate-level error type. All variants are fatal to the invocation that
//! raised them; no partial output is produced.

use crate::{node::NodeError, path, store::StoreError};
use alloy_primitives::B256;
use std::{error, fmt};

/// Reported by sinks that want to abort a build with their own failure.
pub type SinkError = Box<dyn error::Error + Send + Sync + 'static>;

#[derive(Debug)]
pub enum Error {
    /// No trie could be opened at the given root.
    MissingRoot(B256),
    /// A node's bytes did not decode as a trie node.
    NodeDecode { path: String, source: NodeError },
    /// A node's key prefix matches no known node kind.
    UnexpectedNodeType { path: String, flag: u8 },
    /// A state leaf value did not decode as an account.
    AccountDecode { path: String, source: alloy_rlp::Error },
    /// A node or code lookup failed.
    Store { path: String, source: StoreError },
    /// The output sink rejected a record.
    Sink(SinkError),
    /// The build was cancelled through its [`CancelToken`](crate::CancelToken).
    Cancelled,
}

impl Error {
    pub(crate) fn node_decode(node_path: &[u8], source: NodeError) -> Self {
        match source {
            NodeError::UnexpectedNodeType(flag) => {
                Self::UnexpectedNodeType { path: path::hex_path(node_path), flag }
            }
            source => Self::NodeDecode { path: path::hex_path(node_path), source },
        }
    }

    pub(crate) fn account_decode(node_path: &[u8], source: alloy_rlp::Error) -> Self {
        Self::AccountDecode { path: path::hex_path(node_path), source }
    }

    pub(crate) fn store(node_path: &[u8], source: StoreError) -> Self {
        Self::Store { path: path::hex_path(node_path), source }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoot(root) => write!(f, "no trie at root {root}"),
            Self::NodeDecode { path, source } => {
                write!(f, "node decode failed at path {path}: {source}")
            }
            Self::UnexpectedNodeType { path, flag } => {
                write!(f, "unexpected node type flag {flag:#x} at path {path}")
            }
            Self::AccountDecode { path, source } => {
                write!(f, "account decode failed at path {path}: {source}")
            }
            Self::Store { path, source } => write!(f, "store lookup at path {path}: {source}"),
            Self::Sink(source) => write!(f, "sink rejected record: {source}"),
            Self::Cancelled => f.write_str("build cancelled"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::NodeDecode { source, .. } => Some(source),
            Self::AccountDecode { source, .. } => Some(source),
            Self::Store { source, .. } => Some(source),
            Self::Sink(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_node_type_is_lifted() {
        let err = Error::node_decode(&[0xa, 0x1], NodeError::UnexpectedNodeType(7));
        match err {
            Error::UnexpectedNodeType { path, flag } => {
                assert_eq!(path, "a1");
                assert_eq!(flag, 7);
            }
            other => panic!("expected unexpected-node-type, got {other}"),
        }
    }

    #[test]
    fn display_includes_path() {
        let err = Error::node_decode(&[0xc, 0x5], NodeError::ElementCount(3));
        assert!(err.to_string().contains("c5"));
    }
}
