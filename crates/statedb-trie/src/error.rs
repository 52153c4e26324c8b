//! Error types for the trie layer.

use alloy_primitives::B256;
use thiserror::Error;

/// Trie-specific errors.
///
/// Range-proof verification failures are reported through this type as well;
/// callers that use proofs to *probe* state (rather than authenticate it)
/// treat those variants as an outcome, not a failure.
#[derive(Error, Debug)]
pub enum TrieError {
    /// The trie rooted at the given hash is not available in the node store.
    #[error("Trie unavailable at root {0}")]
    MissingTrie(B256),

    /// A referenced node blob could not be resolved.
    #[error("Missing trie node {0}")]
    MissingNode(B256),

    /// A node blob failed to decode.
    #[error("Failed to decode trie node: {0}")]
    Decode(#[from] alloy_rlp::Error),

    /// The reconstructed range does not hash to the expected root.
    #[error("Wrong root: have {have}, want {want}")]
    WrongRoot { have: B256, want: B256 },

    /// A range claimed to be empty while the proof shows entries exist.
    #[error("More entries available beyond the claimed range")]
    MoreEntries,

    /// The key/value list handed to range verification is malformed.
    #[error("Invalid range: {0}")]
    InvalidRange(&'static str),

    /// A proved value disagrees with the claimed one.
    #[error("Value mismatch for key {0}")]
    ValueMismatch(B256),

    /// Structural corruption: node shape is impossible for fixed-width keys.
    #[error("Corrupted trie: {0}")]
    Corrupt(&'static str),
}

/// Result type for trie operations.
pub type TrieResult<T> = Result<T, TrieError>;
