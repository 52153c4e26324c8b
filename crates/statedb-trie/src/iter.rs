//! Ascending leaf iteration with a pluggable resolver overlay.

use crate::builder::branch_children;
use crate::trie::Trie;
use crate::{TrieError, TrieResult};
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use alloy_trie::nodes::{RlpNode, TrieNode};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Pack an even-length nibble path back into bytes.
pub(crate) fn nibbles_to_bytes(nibs: &Nibbles) -> Vec<u8> {
    let mut out = Vec::with_capacity(nibs.len() / 2);
    for i in (0..nibs.len()).step_by(2) {
        let hi = nibs.get(i).unwrap_or(0);
        let lo = nibs.get(i + 1).unwrap_or(0);
        out.push((hi << 4) | lo);
    }
    out
}

enum Frame {
    /// A node pointer that has not been expanded yet.
    Node { ptr: RlpNode, prefix: Nibbles },
    /// A branch with children still to scan, starting at `next`.
    Branch {
        children: [Option<RlpNode>; 16],
        prefix: Nibbles,
        next: u8,
    },
}

/// Depth-first in-order traversal of a trie's leaves, starting at an origin
/// key. Subtrees that end before the origin are pruned without resolution.
///
/// An overlay installed with [`LeafIterator::add_resolver`] is consulted
/// before the trie's node store; when the overlay was built from data close
/// to the authoritative state, iteration touches disk only near divergences.
pub struct LeafIterator<'a> {
    trie: &'a Trie,
    overlay: Option<HashMap<B256, Vec<u8>>>,
    origin: Nibbles,
    stack: Vec<Frame>,
    init: bool,
    done: bool,
}

impl<'a> LeafIterator<'a> {
    pub(crate) fn new(trie: &'a Trie, origin: &[u8]) -> Self {
        Self {
            trie,
            overlay: None,
            origin: Nibbles::unpack(origin),
            stack: Vec::new(),
            init: false,
            done: false,
        }
    }

    /// Install a `hash -> rlp` overlay consulted before the node store.
    pub fn add_resolver(&mut self, nodes: HashMap<B256, Vec<u8>>) {
        self.overlay = Some(nodes);
    }

    fn resolve(&self, ptr: &RlpNode) -> TrieResult<TrieNode> {
        if let Some(hash) = ptr.as_hash() {
            let blob = self
                .overlay
                .as_ref()
                .and_then(|m| m.get(&hash).cloned())
                .or_else(|| self.trie.reader_node(&hash))
                .ok_or(TrieError::MissingNode(hash))?;
            let mut slice = blob.as_slice();
            Ok(TrieNode::decode(&mut slice)?)
        } else {
            let mut slice = ptr.as_ref();
            Ok(TrieNode::decode(&mut slice)?)
        }
    }

    /// Whether every key under `prefix` sorts before the origin.
    fn before_origin(&self, prefix: &Nibbles) -> bool {
        let n = prefix.len().min(self.origin.len());
        prefix.slice(..n).cmp(&self.origin.slice(..n)) == Ordering::Less
    }

    fn advance(&mut self) -> TrieResult<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.init {
            self.init = true;
            if self.trie.root() != EMPTY_ROOT_HASH {
                self.stack.push(Frame::Node {
                    ptr: RlpNode::word_rlp(&self.trie.root()),
                    prefix: Nibbles::default(),
                });
            }
        }
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Node { ptr, prefix } => match self.resolve(&ptr)? {
                    TrieNode::EmptyRoot => {}
                    TrieNode::Leaf(leaf) => {
                        let full = prefix.join(&leaf.key);
                        if full.cmp(&self.origin) != Ordering::Less {
                            return Ok(Some((nibbles_to_bytes(&full), leaf.value)));
                        }
                    }
                    TrieNode::Extension(ext) => {
                        let child_prefix = prefix.join(&ext.key);
                        if !self.before_origin(&child_prefix) {
                            self.stack.push(Frame::Node {
                                ptr: ext.child,
                                prefix: child_prefix,
                            });
                        }
                    }
                    TrieNode::Branch(branch) => {
                        self.stack.push(Frame::Branch {
                            children: branch_children(&branch),
                            prefix,
                            next: 0,
                        });
                    }
                },
                Frame::Branch {
                    mut children,
                    prefix,
                    next,
                } => {
                    if let Some(idx) = (next..16).find(|i| children[*i as usize].is_some()) {
                        let child = children[idx as usize].take().unwrap();
                        let child_prefix =
                            prefix.join(&Nibbles::from_nibbles_unchecked([idx]));
                        self.stack.push(Frame::Branch {
                            children,
                            prefix,
                            next: idx + 1,
                        });
                        if !self.before_origin(&child_prefix) {
                            self.stack.push(Frame::Node {
                                ptr: child,
                                prefix: child_prefix,
                            });
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Iterator for LeafIterator<'_> {
    type Item = TrieResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryNodeReader, NodeReader, TrieId};
    use crate::TrieBuilder;
    use std::sync::Arc;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    fn build_trie(entries: &[(Vec<u8>, Vec<u8>)]) -> (B256, Arc<dyn NodeReader>) {
        let mut builder = TrieBuilder::new();
        for (k, v) in entries {
            builder.insert(k, v).unwrap();
        }
        let (root, nodes) = builder.commit();
        (root, Arc::new(MemoryNodeReader::new(nodes)))
    }

    #[test]
    fn test_iterates_in_key_order() {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = [0xfeu8, 0x02, 0x80, 0x01, 0x81]
            .iter()
            .map(|b| (key(*b), vec![*b]))
            .collect();
        let (root, reader) = build_trie(&entries);
        let trie = Trie::open(TrieId::state(root), reader).unwrap();

        let got: Vec<_> = trie.iter(&[]).collect::<TrieResult<Vec<_>>>().unwrap();
        entries.sort();
        assert_eq!(got, entries);
    }

    #[test]
    fn test_iterates_from_origin() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..8)
            .map(|b| (key(b * 0x10), vec![b]))
            .collect();
        let (root, reader) = build_trie(&entries);
        let trie = Trie::open(TrieId::state(root), reader).unwrap();

        let got: Vec<_> = trie
            .iter(&key(0x30))
            .collect::<TrieResult<Vec<_>>>()
            .unwrap();
        assert_eq!(got, entries[3..].to_vec());

        // Origin between keys starts at the next greater key.
        let mut origin = key(0x30);
        origin[31] = 0x31;
        let got: Vec<_> = trie
            .iter(&origin)
            .collect::<TrieResult<Vec<_>>>()
            .unwrap();
        assert_eq!(got, entries[4..].to_vec());
    }

    #[test]
    fn test_empty_trie_yields_nothing() {
        let reader: Arc<dyn NodeReader> = Arc::new(MemoryNodeReader::new(HashMap::new()));
        let trie = Trie::open(TrieId::state(alloy_trie::EMPTY_ROOT_HASH), reader).unwrap();
        assert!(trie.iter(&[]).next().is_none());
    }

    #[test]
    fn test_resolver_overlay_short_circuits_store() {
        let entries = vec![(key(0x11), b"a".to_vec()), (key(0x22), b"b".to_vec())];
        let mut builder = TrieBuilder::new();
        for (k, v) in &entries {
            builder.insert(k, v).unwrap();
        }
        let (root, nodes) = builder.commit();

        // The store only knows the root blob (enough to open the handle);
        // every other node must come from the overlay.
        let mut store = HashMap::new();
        store.insert(root, nodes[&root].clone());
        let reader: Arc<dyn NodeReader> = Arc::new(MemoryNodeReader::new(store));
        let trie = Trie::open(TrieId::state(root), reader).unwrap();
        let mut iter = trie.iter(&[]);
        iter.add_resolver(nodes);
        let got: Vec<_> = iter.collect::<TrieResult<Vec<_>>>().unwrap();
        assert_eq!(got, entries);
    }
}
