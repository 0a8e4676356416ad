#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stderr)]
#![warn(clippy::print_stdout)]
#![warn(missing_debug_implementations)]
#![warn(unnameable_types)]
#![warn(unreachable_pub)]
#![warn(unused_macro_rules)]

//! Streaming state diffs between two Merkle Patricia trie roots sharing a
//! content-addressed node store.
//!
//! The entry point is [`Builder`]: open it over a [`StateStore`] and ask for
//! the diff between two state roots, either collected into a
//! [`StateObject`](types::StateObject) or streamed record by record into a
//! [`StateNodeSink`](types::StateNodeSink).

pub mod account;
pub mod builder;
pub mod cancel;
pub mod cursor;
pub mod difference;
pub mod error;
mod metrics;
pub mod node;
pub mod params;
pub mod path;
pub mod store;
pub mod types;

pub use account::Account;
pub use builder::Builder;
pub use cancel::CancelToken;
pub use error::Error;
pub use params::Params;
pub use store::{MemoryStore, StateStore};
pub use types::{
    Args, Block, CodeAndHash, NodeType, StateNode, StateNodeSink, StateObject, StateRoots,
    StorageNode, StorageNodeSink,
};
