//! In-memory trie construction.
//!
//! `TrieBuilder` assembles a Merkle Patricia trie from key/value pairs and
//! tracks every materialized node as a `hash -> rlp` record. Committed node
//! sets can be persisted as fixture tries or used as resolver overlays that
//! short-circuit disk lookups during iteration.
//!
//! The builder is insert-only: range verification prunes subtrees with its
//! own node surgery and re-inserts the claimed window, so no general delete
//! path is required.

use crate::{TrieError, TrieResult};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::Decodable;
use alloy_trie::nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode, TrieNode};
use alloy_trie::{Nibbles, TrieMask, EMPTY_ROOT_HASH};
use std::collections::HashMap;

/// Expand a branch node into its sixteen child slots.
pub(crate) fn branch_children(branch: &BranchNode) -> [Option<RlpNode>; 16] {
    let mut out: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);
    let mut pos = 0usize;
    for idx in 0..16u8 {
        if branch.state_mask.is_bit_set(idx) {
            out[idx as usize] = branch.stack.get(pos).cloned();
            pos += 1;
        }
    }
    out
}

/// Incremental in-memory trie.
pub struct TrieBuilder {
    root: Option<RlpNode>,
    /// Nodes emitted by this builder, keyed by hash.
    nodes: HashMap<B256, Vec<u8>>,
    /// Read-only fallback nodes (e.g. a decoded proof set).
    external: HashMap<B256, Vec<u8>>,
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            root: None,
            nodes: HashMap::new(),
            external: HashMap::new(),
        }
    }

    /// Create a builder seeded at an existing root whose nodes are resolved
    /// from the given external map.
    pub fn with_external(root: B256, external: HashMap<B256, Vec<u8>>) -> Self {
        let root = (root != EMPTY_ROOT_HASH).then(|| RlpNode::word_rlp(&root));
        Self {
            root,
            nodes: HashMap::new(),
            external,
        }
    }

    /// Insert a key/value pair. Keys must share one fixed width.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        let path = Nibbles::unpack(key);
        let root = self.root.clone();
        let next = self.insert_at(root.as_ref(), &path, 0, value)?;
        self.root = Some(next);
        Ok(())
    }

    /// Current root hash. Records the root blob even when the root node is
    /// small enough to be inlined, so lookups by root hash always succeed.
    pub fn root_hash(&mut self) -> B256 {
        match self.root.clone() {
            None => EMPTY_ROOT_HASH,
            Some(ptr) => match ptr.as_hash() {
                Some(hash) => hash,
                None => {
                    let hash = keccak256(ptr.as_ref());
                    self.nodes
                        .entry(hash)
                        .or_insert_with(|| ptr.as_ref().to_vec());
                    hash
                }
            },
        }
    }

    /// Finalize the builder, returning the root hash and every materialized
    /// `hash -> rlp` record.
    pub fn commit(mut self) -> (B256, HashMap<B256, Vec<u8>>) {
        let root = self.root_hash();
        (root, self.nodes)
    }

    pub(crate) fn set_root_ptr(&mut self, ptr: Option<RlpNode>) {
        self.root = ptr;
    }

    /// Decode the node behind a pointer, consulting emitted nodes first and
    /// the external map second. An unresolvable hash is a hard error.
    pub(crate) fn resolve_ptr(&self, ptr: &RlpNode) -> TrieResult<TrieNode> {
        if let Some(hash) = ptr.as_hash() {
            let blob = self
                .nodes
                .get(&hash)
                .or_else(|| self.external.get(&hash))
                .ok_or(TrieError::MissingNode(hash))?;
            let mut slice = blob.as_slice();
            Ok(TrieNode::decode(&mut slice)?)
        } else {
            let mut slice = ptr.as_ref();
            Ok(TrieNode::decode(&mut slice)?)
        }
    }

    /// Encode a node, record it when hash-referenced, and return its pointer.
    pub(crate) fn emit_node(&mut self, node: TrieNode) -> RlpNode {
        let mut raw = Vec::with_capacity(96);
        let ptr = node.rlp(&mut raw);
        if let Some(hash) = ptr.as_hash() {
            self.nodes.entry(hash).or_insert(raw);
        }
        ptr
    }

    /// Emit a branch node from child slots; `None` when all slots are empty.
    pub(crate) fn emit_branch(&mut self, children: [Option<RlpNode>; 16]) -> Option<RlpNode> {
        let mut stack = Vec::new();
        let mut mask = TrieMask::default();
        for (idx, child) in children.into_iter().enumerate() {
            if let Some(child) = child {
                mask.set_bit(idx as u8);
                stack.push(child);
            }
        }
        if stack.is_empty() {
            return None;
        }
        Some(self.emit_node(TrieNode::Branch(BranchNode::new(stack, mask))))
    }

    fn insert_at(
        &mut self,
        ptr: Option<&RlpNode>,
        path: &Nibbles,
        depth: usize,
        value: &[u8],
    ) -> TrieResult<RlpNode> {
        let rest = path.slice(depth..);
        let Some(ptr) = ptr else {
            return Ok(self.emit_node(TrieNode::Leaf(LeafNode::new(rest, value.to_vec()))));
        };
        match self.resolve_ptr(ptr)? {
            TrieNode::EmptyRoot => {
                Ok(self.emit_node(TrieNode::Leaf(LeafNode::new(rest, value.to_vec()))))
            }
            TrieNode::Leaf(leaf) => self.insert_into_leaf(ptr, leaf, &rest, value),
            TrieNode::Extension(ext) => self.insert_into_extension(ext, path, depth, value),
            TrieNode::Branch(branch) => self.insert_into_branch(branch, path, depth, value),
        }
    }

    fn insert_into_leaf(
        &mut self,
        old_ptr: &RlpNode,
        leaf: LeafNode,
        rest: &Nibbles,
        value: &[u8],
    ) -> TrieResult<RlpNode> {
        let common = leaf.key.common_prefix_length(rest);
        if common == leaf.key.len() && common == rest.len() {
            if leaf.value.as_slice() == value {
                return Ok(old_ptr.clone());
            }
            return Ok(self.emit_node(TrieNode::Leaf(LeafNode::new(leaf.key, value.to_vec()))));
        }
        if common == leaf.key.len() || common == rest.len() {
            return Err(TrieError::Corrupt("variable-width key below leaf"));
        }
        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);

        let old_idx = leaf.key.get(common).unwrap() as usize;
        let old_tail = leaf.key.slice(common + 1..);
        children[old_idx] = Some(self.emit_node(TrieNode::Leaf(LeafNode::new(old_tail, leaf.value))));

        let new_idx = rest.get(common).unwrap() as usize;
        let new_tail = rest.slice(common + 1..);
        children[new_idx] =
            Some(self.emit_node(TrieNode::Leaf(LeafNode::new(new_tail, value.to_vec()))));

        let branch = self
            .emit_branch(children)
            .ok_or(TrieError::Corrupt("empty branch after leaf split"))?;
        if common > 0 {
            let prefix = rest.slice(..common);
            Ok(self.emit_node(TrieNode::Extension(ExtensionNode::new(prefix, branch))))
        } else {
            Ok(branch)
        }
    }

    fn insert_into_extension(
        &mut self,
        ext: ExtensionNode,
        path: &Nibbles,
        depth: usize,
        value: &[u8],
    ) -> TrieResult<RlpNode> {
        let rest = path.slice(depth..);
        let common = ext.key.common_prefix_length(&rest);
        if common == ext.key.len() {
            let child = self.insert_at(Some(&ext.child), path, depth + common, value)?;
            return Ok(self.emit_node(TrieNode::Extension(ExtensionNode::new(ext.key, child))));
        }
        if common == rest.len() {
            return Err(TrieError::Corrupt("variable-width key below extension"));
        }
        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);

        let old_idx = ext.key.get(common).unwrap() as usize;
        let old_tail = ext.key.slice(common + 1..);
        children[old_idx] = Some(if old_tail.is_empty() {
            ext.child
        } else {
            self.emit_node(TrieNode::Extension(ExtensionNode::new(old_tail, ext.child)))
        });

        let new_idx = rest.get(common).unwrap() as usize;
        let new_tail = rest.slice(common + 1..);
        children[new_idx] =
            Some(self.emit_node(TrieNode::Leaf(LeafNode::new(new_tail, value.to_vec()))));

        let branch = self
            .emit_branch(children)
            .ok_or(TrieError::Corrupt("empty branch after extension split"))?;
        if common > 0 {
            let prefix = rest.slice(..common);
            Ok(self.emit_node(TrieNode::Extension(ExtensionNode::new(prefix, branch))))
        } else {
            Ok(branch)
        }
    }

    fn insert_into_branch(
        &mut self,
        branch: BranchNode,
        path: &Nibbles,
        depth: usize,
        value: &[u8],
    ) -> TrieResult<RlpNode> {
        let Some(idx) = path.get(depth) else {
            return Err(TrieError::Corrupt("variable-width key at branch"));
        };
        let mut children = branch_children(&branch);
        let child = children[idx as usize].take();
        let next = self.insert_at(child.as_ref(), path, depth + 1, value)?;
        children[idx as usize] = Some(next);
        self.emit_branch(children)
            .ok_or(TrieError::Corrupt("empty branch after insert"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_root;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    #[test]
    fn test_empty_root() {
        let mut builder = TrieBuilder::new();
        assert_eq!(builder.root_hash(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_root_matches_stack_trie() {
        // The streaming hash builder is an independent implementation; both
        // must agree on the canonical root for the same content.
        let keys: Vec<Vec<u8>> = [0x11u8, 0x22, 0x23, 0x80, 0xfe]
            .iter()
            .map(|b| key(*b))
            .collect();
        let vals: Vec<Vec<u8>> = (1u8..=5).map(|v| vec![v; 9]).collect();

        let mut builder = TrieBuilder::new();
        for (k, v) in keys.iter().zip(&vals) {
            builder.insert(k, v).unwrap();
        }
        assert_eq!(builder.root_hash(), stack_root(&keys, &vals));
    }

    #[test]
    fn test_insert_order_independent() {
        let keys: Vec<Vec<u8>> = vec![key(0x01), key(0x02), key(0xf0)];
        let vals: Vec<Vec<u8>> = vec![vec![1], vec![2], vec![3]];

        let mut forward = TrieBuilder::new();
        for (k, v) in keys.iter().zip(&vals) {
            forward.insert(k, v).unwrap();
        }
        let mut reverse = TrieBuilder::new();
        for (k, v) in keys.iter().zip(&vals).rev() {
            reverse.insert(k, v).unwrap();
        }
        assert_eq!(forward.root_hash(), reverse.root_hash());
    }

    #[test]
    fn test_overwrite_same_value_is_stable() {
        let mut builder = TrieBuilder::new();
        builder.insert(&key(0x11), b"val").unwrap();
        let before = builder.root_hash();
        builder.insert(&key(0x11), b"val").unwrap();
        assert_eq!(builder.root_hash(), before);
        builder.insert(&key(0x11), b"other").unwrap();
        assert_ne!(builder.root_hash(), before);
    }

    #[test]
    fn test_commit_records_root_blob() {
        let mut builder = TrieBuilder::new();
        builder.insert(&key(0x11), b"v").unwrap();
        let (root, nodes) = builder.commit();
        assert!(nodes.contains_key(&root));
    }
}
