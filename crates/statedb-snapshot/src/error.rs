//! Error types for snapshot generation.

use statedb_storage::StorageError;
use statedb_trie::TrieError;
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Snapshot generation errors.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Trie error surfaced during iteration or proving.
    #[error("Trie error: {0}")]
    Trie(#[from] TrieError),

    /// The target trie is unavailable; generation pauses and awaits the
    /// next signal without touching the progress marker.
    #[error("Trie unavailable, snapshot generation paused")]
    MissingTrie,

    /// The flat-state cursor yielded a key before its lower bound. This
    /// indicates a bug in the underlying store.
    #[error("Invalid iteration position")]
    InvalidIteratorPosition,

    /// An account row failed to decode: corrupted state.
    #[error("Corrupted account data: {0}")]
    CorruptedAccount(String),

    /// The generation was interrupted. Carries the reply channel; dropping
    /// it acknowledges the interruption to the caller of `stop`.
    #[error("Snapshot generation aborted")]
    Aborted(Sender<()>),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;
