//! Read-only trie handle over a node store.

use crate::builder::branch_children;
use crate::iter::LeafIterator;
use crate::proof::ProofSet;
use crate::store::{NodeReader, TrieId};
use crate::{TrieError, TrieResult};
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use alloy_trie::nodes::{RlpNode, TrieNode};
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};
use std::sync::Arc;

/// A trie opened at a specific root.
///
/// The handle is cheap to clone around: it holds the identifier and a shared
/// node reader, nothing else.
#[derive(Clone)]
pub struct Trie {
    id: TrieId,
    reader: Arc<dyn NodeReader>,
}

impl Trie {
    /// Open the trie identified by `id`.
    ///
    /// Returns [`TrieError::MissingTrie`] when the root node is not present
    /// in the node store. Callers use this as the signal that generation
    /// against this root must pause rather than fail.
    pub fn open(id: TrieId, reader: Arc<dyn NodeReader>) -> TrieResult<Self> {
        if id.root != EMPTY_ROOT_HASH && reader.node(&id.root).is_none() {
            return Err(TrieError::MissingTrie(id.root));
        }
        Ok(Self { id, reader })
    }

    /// The identifier this trie was opened with.
    pub fn id(&self) -> &TrieId {
        &self.id
    }

    /// Root hash.
    pub fn root(&self) -> B256 {
        self.id.root
    }

    pub(crate) fn reader_node(&self, hash: &B256) -> Option<Vec<u8>> {
        self.reader.node(hash)
    }

    fn resolve(&self, ptr: &RlpNode) -> TrieResult<TrieNode> {
        if let Some(hash) = ptr.as_hash() {
            let blob = self
                .reader
                .node(&hash)
                .ok_or(TrieError::MissingNode(hash))?;
            let mut slice = blob.as_slice();
            Ok(TrieNode::decode(&mut slice)?)
        } else {
            let mut slice = ptr.as_ref();
            Ok(TrieNode::decode(&mut slice)?)
        }
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        if self.id.root == EMPTY_ROOT_HASH {
            return Ok(None);
        }
        let path = Nibbles::unpack(key);
        let mut ptr = RlpNode::word_rlp(&self.id.root);
        let mut depth = 0usize;
        loop {
            match self.resolve(&ptr)? {
                TrieNode::EmptyRoot => return Ok(None),
                TrieNode::Leaf(leaf) => {
                    if leaf.key == path.slice(depth..) {
                        return Ok(Some(leaf.value));
                    }
                    return Ok(None);
                }
                TrieNode::Extension(ext) => {
                    let end = depth + ext.key.len();
                    if end > path.len() || ext.key != path.slice(depth..end) {
                        return Ok(None);
                    }
                    ptr = ext.child;
                    depth = end;
                }
                TrieNode::Branch(branch) => {
                    let Some(idx) = path.get(depth) else {
                        return Ok(None);
                    };
                    match branch_children(&branch)[idx as usize].clone() {
                        Some(child) => {
                            ptr = child;
                            depth += 1;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Collect the Merkle proof of `key` into the proof sink: the blobs of
    /// every hash-referenced node on the key's path, starting at the root.
    /// Proving an absent key is valid and yields the path to the divergence.
    pub fn prove(&self, key: &[u8], proof: &mut ProofSet) -> TrieResult<()> {
        if self.id.root == EMPTY_ROOT_HASH {
            return Ok(());
        }
        let path = Nibbles::unpack(key);
        let mut ptr = RlpNode::word_rlp(&self.id.root);
        let mut depth = 0usize;
        loop {
            let node = if let Some(hash) = ptr.as_hash() {
                let blob = self
                    .reader
                    .node(&hash)
                    .ok_or(TrieError::MissingNode(hash))?;
                proof.insert(hash, blob.clone());
                let mut slice = blob.as_slice();
                TrieNode::decode(&mut slice)?
            } else {
                let mut slice = ptr.as_ref();
                TrieNode::decode(&mut slice)?
            };
            match node {
                TrieNode::EmptyRoot | TrieNode::Leaf(_) => return Ok(()),
                TrieNode::Extension(ext) => {
                    let end = depth + ext.key.len();
                    if end > path.len() || ext.key != path.slice(depth..end) {
                        return Ok(());
                    }
                    ptr = ext.child;
                    depth = end;
                }
                TrieNode::Branch(branch) => {
                    let Some(idx) = path.get(depth) else {
                        return Ok(());
                    };
                    match branch_children(&branch)[idx as usize].clone() {
                        Some(child) => {
                            ptr = child;
                            depth += 1;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Ascending leaf iteration starting at `origin` (inclusive). Pass an
    /// empty origin to iterate from the first leaf.
    pub fn iter(&self, origin: &[u8]) -> LeafIterator<'_> {
        LeafIterator::new(self, origin)
    }
}

/// Root hash of an ordered key/value stream, computed with the streaming
/// hash builder and without retaining intermediate nodes.
pub fn stack_root(keys: &[Vec<u8>], vals: &[Vec<u8>]) -> B256 {
    let mut builder = HashBuilder::default();
    for (key, val) in keys.iter().zip(vals) {
        builder.add_leaf(Nibbles::unpack(key), val);
    }
    builder.root()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeReader;
    use crate::TrieBuilder;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    fn build(entries: &[(Vec<u8>, Vec<u8>)]) -> (B256, Arc<dyn NodeReader>) {
        let mut builder = TrieBuilder::new();
        for (k, v) in entries {
            builder.insert(k, v).unwrap();
        }
        let (root, nodes) = builder.commit();
        (root, Arc::new(MemoryNodeReader::new(nodes)))
    }

    #[test]
    fn test_open_missing_trie() {
        let reader: Arc<dyn NodeReader> =
            Arc::new(MemoryNodeReader::new(std::collections::HashMap::new()));
        let err = Trie::open(TrieId::state(B256::repeat_byte(0xaa)), reader).unwrap_err();
        assert!(matches!(err, TrieError::MissingTrie(_)));
    }

    #[test]
    fn test_get_present_and_absent() {
        let entries = vec![(key(0x11), b"one".to_vec()), (key(0x22), b"two".to_vec())];
        let (root, reader) = build(&entries);
        let trie = Trie::open(TrieId::state(root), reader).unwrap();

        assert_eq!(trie.get(&key(0x11)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(trie.get(&key(0x22)).unwrap(), Some(b"two".to_vec()));
        assert_eq!(trie.get(&key(0x33)).unwrap(), None);
    }

    #[test]
    fn test_empty_stack_root() {
        assert_eq!(stack_root(&[], &[]), EMPTY_ROOT_HASH);
    }
}
