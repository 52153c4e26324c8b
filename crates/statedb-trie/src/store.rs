//! Node store abstraction.
//!
//! Trie nodes are content-addressed: the store maps `keccak256(rlp)` to the
//! RLP blob. Nodes shorter than 32 bytes are embedded in their parent and
//! never hit the store.

use alloy_primitives::B256;
use statedb_storage::{ColumnFamily, Storage, StorageResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to trie node blobs.
pub trait NodeReader: Send + Sync {
    /// Retrieve the node blob with the given hash. Absence is not an error.
    fn node(&self, hash: &B256) -> Option<Vec<u8>>;
}

/// Node reader backed by the persistent key-value store.
pub struct DiskNodeReader {
    db: Arc<dyn Storage>,
}

impl DiskNodeReader {
    /// Create a reader over the trie-node column family.
    pub fn new(db: Arc<dyn Storage>) -> Self {
        Self { db }
    }
}

impl NodeReader for DiskNodeReader {
    fn node(&self, hash: &B256) -> Option<Vec<u8>> {
        self.db
            .get(ColumnFamily::TrieNodes, hash.as_slice())
            .ok()
            .flatten()
    }
}

/// In-memory node reader, used for fixture tries and as a building block for
/// resolver overlays.
pub struct MemoryNodeReader {
    nodes: HashMap<B256, Vec<u8>>,
}

impl MemoryNodeReader {
    /// Wrap a hash-to-blob map.
    pub fn new(nodes: HashMap<B256, Vec<u8>>) -> Self {
        Self { nodes }
    }
}

impl NodeReader for MemoryNodeReader {
    fn node(&self, hash: &B256) -> Option<Vec<u8>> {
        self.nodes.get(hash).cloned()
    }
}

/// Persist a committed node set into the trie-node column family.
pub fn persist_nodes(db: &dyn Storage, nodes: &HashMap<B256, Vec<u8>>) -> StorageResult<()> {
    for (hash, blob) in nodes {
        db.put(ColumnFamily::TrieNodes, hash.as_slice(), blob)?;
    }
    Ok(())
}

/// Identifier of a trie: the owning account (zero for the account trie
/// itself) and the expected root hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieId {
    /// Owner hash; zero for the account trie.
    pub owner: B256,
    /// Expected root hash.
    pub root: B256,
}

impl TrieId {
    /// Identifier of the account trie at the given state root.
    pub fn state(root: B256) -> Self {
        Self {
            owner: B256::ZERO,
            root,
        }
    }

    /// Identifier of a contract storage trie.
    pub fn storage(owner: B256, root: B256) -> Self {
        Self { owner, root }
    }
}
