//! # statedb-trie
//!
//! Merkle Patricia trie collaborator for the statedb workspace.
//!
//! This crate provides:
//! - A content-addressed node store abstraction (`NodeReader`)
//! - Read-only trie handles with key lookups and Merkle proofs
//! - Range-proof verification over two edge proofs
//! - Ascending leaf iteration with a pluggable resolver overlay
//! - In-memory trie construction and a streaming stack-trie root
//!
//! Keys are fixed-width (32-byte hashes); values are opaque RLP payloads.

mod builder;
mod error;
mod iter;
mod proof;
mod store;
mod trie;

pub use builder::TrieBuilder;
pub use error::{TrieError, TrieResult};
pub use iter::LeafIterator;
pub use proof::{verify_range, ProofSet};
pub use store::{persist_nodes, DiskNodeReader, MemoryNodeReader, NodeReader, TrieId};
pub use trie::{stack_root, Trie};

pub use alloy_trie::{TrieAccount, EMPTY_ROOT_HASH, KECCAK_EMPTY};
