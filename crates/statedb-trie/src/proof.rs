//! Merkle range proofs.
//!
//! A range proof authenticates that an ordered key/value list is exactly the
//! set of leaves between two bounds of a trie. Verification reconstructs a
//! partial trie from the two edge proofs, prunes everything inside the
//! claimed window, re-inserts the claimed list and compares the resulting
//! root against the expected one. Any disagreement surfaces as an error the
//! caller may treat as "range is stale" rather than as a failure.

use crate::builder::{branch_children, TrieBuilder};
use crate::{TrieError, TrieResult};
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use alloy_trie::nodes::{ExtensionNode, RlpNode, TrieNode};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Proof sink: the `hash -> rlp` blobs of every node on the proven paths.
#[derive(Debug, Default, Clone)]
pub struct ProofSet {
    nodes: HashMap<B256, Vec<u8>>,
}

impl ProofSet {
    /// Create an empty proof set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node blob.
    pub fn insert(&mut self, hash: B256, blob: Vec<u8>) {
        self.nodes.insert(hash, blob);
    }

    /// Look up a node blob.
    pub fn get(&self, hash: &B256) -> Option<&Vec<u8>> {
        self.nodes.get(hash)
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the set holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn clone_nodes(&self) -> HashMap<B256, Vec<u8>> {
        self.nodes.clone()
    }

    fn resolve(&self, ptr: &RlpNode) -> TrieResult<TrieNode> {
        if let Some(hash) = ptr.as_hash() {
            let blob = self.nodes.get(&hash).ok_or(TrieError::MissingNode(hash))?;
            let mut slice = blob.as_slice();
            Ok(TrieNode::decode(&mut slice)?)
        } else {
            let mut slice = ptr.as_ref();
            Ok(TrieNode::decode(&mut slice)?)
        }
    }
}

/// Verify that `keys`/`vals` are exactly the trie's leaves in
/// `[origin, keys.last()]`, using the edge proofs recorded in `proof`.
///
/// Returns `Ok(true)` when the trie continues past the last key, `Ok(false)`
/// when the range exhausts it. An empty key list claims that the trie holds
/// nothing at or after `origin`.
pub fn verify_range(
    root: B256,
    origin: &[u8],
    keys: &[Vec<u8>],
    vals: &[Vec<u8>],
    proof: &ProofSet,
) -> TrieResult<bool> {
    if keys.len() != vals.len() {
        return Err(TrieError::InvalidRange("key/value count mismatch"));
    }
    if keys.iter().any(|k| k.len() != origin.len()) {
        return Err(TrieError::InvalidRange("mixed key widths"));
    }
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(TrieError::InvalidRange("keys out of order"));
    }
    if keys.first().is_some_and(|k| k.as_slice() < origin) {
        return Err(TrieError::InvalidRange("key before origin"));
    }

    if root == EMPTY_ROOT_HASH {
        if keys.is_empty() {
            return Ok(false);
        }
        return Err(TrieError::WrongRoot {
            have: crate::stack_root(keys, vals),
            want: root,
        });
    }
    let root_ptr = RlpNode::word_rlp(&root);
    let origin_nibs = Nibbles::unpack(origin);

    // Absence claim: the proof of the origin must show neither a value at
    // the origin nor any entry to its right.
    if keys.is_empty() {
        let val = walk_value(proof, &root_ptr, &origin_nibs)?;
        if val.is_some() || has_right_element(proof, &root_ptr, &origin_nibs)? {
            return Err(TrieError::MoreEntries);
        }
        return Ok(false);
    }

    // Single element anchored at the origin: its own proof authenticates it.
    if keys.len() == 1 && keys[0].as_slice() == origin {
        match walk_value(proof, &root_ptr, &origin_nibs)? {
            Some(val) if val == vals[0] => {
                return has_right_element(proof, &root_ptr, &origin_nibs);
            }
            _ => return Err(TrieError::ValueMismatch(B256::from_slice(origin))),
        }
    }

    let last = keys.last().unwrap();
    let last_nibs = Nibbles::unpack(last);
    let more = has_right_element(proof, &root_ptr, &last_nibs)?;

    // Drop everything inside [origin, last], then rebuild that window from
    // the claimed list. Nodes outside the window stay as opaque hash
    // pointers supplied by the edge proofs.
    let mut builder = TrieBuilder::with_external(root, proof.clone_nodes());
    let pruned = unset_range(&mut builder, &root_ptr, &origin_nibs, &last_nibs, 0)?;
    builder.set_root_ptr(pruned);
    for (key, val) in keys.iter().zip(vals) {
        builder.insert(key, val)?;
    }
    let have = builder.root_hash();
    if have != root {
        trace!(%have, want = %root, "Range reconstruction root mismatch");
        return Err(TrieError::WrongRoot { have, want: root });
    }
    Ok(more)
}

/// Walk the proof along `key`, returning the leaf value stored there.
fn walk_value(
    proof: &ProofSet,
    root_ptr: &RlpNode,
    key: &Nibbles,
) -> TrieResult<Option<Vec<u8>>> {
    let mut ptr = root_ptr.clone();
    let mut depth = 0usize;
    loop {
        match proof.resolve(&ptr)? {
            TrieNode::EmptyRoot => return Ok(None),
            TrieNode::Leaf(leaf) => {
                if leaf.key == key.slice(depth..) {
                    return Ok(Some(leaf.value));
                }
                return Ok(None);
            }
            TrieNode::Extension(ext) => {
                let end = depth + ext.key.len();
                if end > key.len() || ext.key != key.slice(depth..end) {
                    return Ok(None);
                }
                ptr = ext.child;
                depth = end;
            }
            TrieNode::Branch(branch) => {
                let Some(idx) = key.get(depth) else {
                    return Err(TrieError::Corrupt("key ends at branch"));
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

/// Whether the trie holds any leaf strictly greater than `key`, judged from
/// the nodes on `key`'s path. Child presence is enough; the children
/// themselves stay unresolved.
fn has_right_element(
    proof: &ProofSet,
    root_ptr: &RlpNode,
    key: &Nibbles,
) -> TrieResult<bool> {
    let mut ptr = root_ptr.clone();
    let mut depth = 0usize;
    loop {
        match proof.resolve(&ptr)? {
            TrieNode::EmptyRoot => return Ok(false),
            TrieNode::Leaf(leaf) => {
                return Ok(leaf.key.cmp(&key.slice(depth..)) == Ordering::Greater);
            }
            TrieNode::Extension(ext) => {
                let end = depth + ext.key.len();
                let seg = key.slice(depth..end.min(key.len()));
                match ext.key.cmp(&seg) {
                    Ordering::Equal => {
                        ptr = ext.child;
                        depth = end;
                    }
                    Ordering::Greater => return Ok(true),
                    Ordering::Less => return Ok(false),
                }
            }
            TrieNode::Branch(branch) => {
                let Some(idx) = key.get(depth) else {
                    return Err(TrieError::Corrupt("key ends at branch"));
                };
                let children = branch_children(&branch);
                if children[idx as usize + 1..].iter().any(Option::is_some) {
                    return Ok(true);
                }
                match children[idx as usize].clone() {
                    Some(child) => {
                        ptr = child;
                        depth += 1;
                    }
                    None => return Ok(false),
                }
            }
        }
    }
}

/// Remove every leaf in `[left, right]` from the subtree behind `ptr`,
/// touching only nodes on the two edge paths. Branches are left uncollapsed;
/// re-insertion of the claimed window restores the canonical shape, and any
/// residue shows up as a root mismatch.
fn unset_range(
    builder: &mut TrieBuilder,
    ptr: &RlpNode,
    left: &Nibbles,
    right: &Nibbles,
    depth: usize,
) -> TrieResult<Option<RlpNode>> {
    match builder.resolve_ptr(ptr)? {
        TrieNode::EmptyRoot => Ok(None),
        TrieNode::Leaf(leaf) => {
            let lseg = left.slice(depth..);
            let rseg = right.slice(depth..);
            let inside = leaf.key.cmp(&lseg) != Ordering::Less
                && leaf.key.cmp(&rseg) != Ordering::Greater;
            Ok((!inside).then(|| ptr.clone()))
        }
        TrieNode::Extension(ext) => {
            let end = depth + ext.key.len();
            let lseg = left.slice(depth..end.min(left.len()));
            let rseg = right.slice(depth..end.min(right.len()));
            match (ext.key.cmp(&lseg), ext.key.cmp(&rseg)) {
                (Ordering::Equal, Ordering::Equal) => {
                    let child = unset_range(builder, &ext.child, left, right, end)?;
                    Ok(child.map(|c| {
                        builder.emit_node(TrieNode::Extension(ExtensionNode::new(ext.key, c)))
                    }))
                }
                // The right bound diverges inside this extension; the whole
                // subtree sits left of it, so only the left bound applies.
                (Ordering::Equal, _) => unset_left_edge(builder, ptr, left, depth),
                // Mirror case for the left bound.
                (_, Ordering::Equal) => unset_right_edge(builder, ptr, right, depth),
                (l_ord, r_ord) => {
                    if l_ord == Ordering::Greater && r_ord == Ordering::Less {
                        // Subtree entirely inside the window.
                        Ok(None)
                    } else {
                        Ok(Some(ptr.clone()))
                    }
                }
            }
        }
        TrieNode::Branch(branch) => {
            let (Some(l), Some(r)) = (left.get(depth), right.get(depth)) else {
                return Err(TrieError::Corrupt("bound ends at branch"));
            };
            let mut children = branch_children(&branch);
            if l == r {
                match children[l as usize].take() {
                    // Nothing stored under the shared bound path.
                    None => Ok(Some(ptr.clone())),
                    Some(child) => {
                        children[l as usize] =
                            unset_range(builder, &child, left, right, depth + 1)?;
                        Ok(builder.emit_branch(children))
                    }
                }
            } else {
                for idx in l + 1..r {
                    children[idx as usize] = None;
                }
                if let Some(child) = children[l as usize].take() {
                    children[l as usize] = unset_left_edge(builder, &child, left, depth + 1)?;
                }
                if let Some(child) = children[r as usize].take() {
                    children[r as usize] = unset_right_edge(builder, &child, right, depth + 1)?;
                }
                Ok(builder.emit_branch(children))
            }
        }
    }
}

/// Remove every leaf `>= left` from a subtree known to sit left of the
/// right bound.
fn unset_left_edge(
    builder: &mut TrieBuilder,
    ptr: &RlpNode,
    left: &Nibbles,
    depth: usize,
) -> TrieResult<Option<RlpNode>> {
    match builder.resolve_ptr(ptr)? {
        TrieNode::EmptyRoot => Ok(None),
        TrieNode::Leaf(leaf) => {
            let keep = leaf.key.cmp(&left.slice(depth..)) == Ordering::Less;
            Ok(keep.then(|| ptr.clone()))
        }
        TrieNode::Extension(ext) => {
            let end = depth + ext.key.len();
            let seg = left.slice(depth..end.min(left.len()));
            match ext.key.cmp(&seg) {
                Ordering::Equal => {
                    let child = unset_left_edge(builder, &ext.child, left, end)?;
                    Ok(child.map(|c| {
                        builder.emit_node(TrieNode::Extension(ExtensionNode::new(ext.key, c)))
                    }))
                }
                Ordering::Greater => Ok(None),
                Ordering::Less => Ok(Some(ptr.clone())),
            }
        }
        TrieNode::Branch(branch) => {
            let Some(idx) = left.get(depth) else {
                return Err(TrieError::Corrupt("bound ends at branch"));
            };
            let mut children = branch_children(&branch);
            for i in idx as usize + 1..16 {
                children[i] = None;
            }
            if let Some(child) = children[idx as usize].take() {
                children[idx as usize] = unset_left_edge(builder, &child, left, depth + 1)?;
            }
            Ok(builder.emit_branch(children))
        }
    }
}

/// Remove every leaf `<= right` from a subtree known to sit right of the
/// left bound.
fn unset_right_edge(
    builder: &mut TrieBuilder,
    ptr: &RlpNode,
    right: &Nibbles,
    depth: usize,
) -> TrieResult<Option<RlpNode>> {
    match builder.resolve_ptr(ptr)? {
        TrieNode::EmptyRoot => Ok(None),
        TrieNode::Leaf(leaf) => {
            let keep = leaf.key.cmp(&right.slice(depth..)) == Ordering::Greater;
            Ok(keep.then(|| ptr.clone()))
        }
        TrieNode::Extension(ext) => {
            let end = depth + ext.key.len();
            let seg = right.slice(depth..end.min(right.len()));
            match ext.key.cmp(&seg) {
                Ordering::Equal => {
                    let child = unset_right_edge(builder, &ext.child, right, end)?;
                    Ok(child.map(|c| {
                        builder.emit_node(TrieNode::Extension(ExtensionNode::new(ext.key, c)))
                    }))
                }
                Ordering::Less => Ok(None),
                Ordering::Greater => Ok(Some(ptr.clone())),
            }
        }
        TrieNode::Branch(branch) => {
            let Some(idx) = right.get(depth) else {
                return Err(TrieError::Corrupt("bound ends at branch"));
            };
            let mut children = branch_children(&branch);
            for i in 0..idx as usize {
                children[i] = None;
            }
            if let Some(child) = children[idx as usize].take() {
                children[idx as usize] = unset_right_edge(builder, &child, right, depth + 1)?;
            }
            Ok(builder.emit_branch(children))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryNodeReader, NodeReader, TrieId};
    use crate::{stack_root, Trie, TrieBuilder};
    use std::sync::Arc;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    fn fixture(count: u8) -> (Vec<Vec<u8>>, Vec<Vec<u8>>, B256, Trie) {
        let keys: Vec<Vec<u8>> = (0..count).map(|i| key(i.wrapping_mul(7).wrapping_add(3))).collect();
        let mut sorted: Vec<(Vec<u8>, Vec<u8>)> = keys
            .iter()
            .map(|k| (k.clone(), vec![k[0], 0xaa, k[0]]))
            .collect();
        sorted.sort();
        let keys: Vec<Vec<u8>> = sorted.iter().map(|(k, _)| k.clone()).collect();
        let vals: Vec<Vec<u8>> = sorted.iter().map(|(_, v)| v.clone()).collect();

        let mut builder = TrieBuilder::new();
        for (k, v) in keys.iter().zip(&vals) {
            builder.insert(k, v).unwrap();
        }
        let (root, nodes) = builder.commit();
        let reader: Arc<dyn NodeReader> = Arc::new(MemoryNodeReader::new(nodes));
        let trie = Trie::open(TrieId::state(root), reader).unwrap();
        (keys, vals, root, trie)
    }

    fn prove_edges(trie: &Trie, origin: &[u8], last: Option<&[u8]>) -> ProofSet {
        let mut proof = ProofSet::new();
        trie.prove(origin, &mut proof).unwrap();
        if let Some(last) = last {
            trie.prove(last, &mut proof).unwrap();
        }
        proof
    }

    #[test]
    fn test_whole_range_from_zero_origin() {
        let (keys, vals, root, trie) = fixture(12);
        let origin = [0u8; 32];
        let proof = prove_edges(&trie, &origin, Some(keys.last().unwrap()));
        let more = verify_range(root, &origin, &keys, &vals, &proof).unwrap();
        assert!(!more);
    }

    #[test]
    fn test_chunked_range_reports_continuation() {
        let (keys, vals, root, trie) = fixture(12);
        let origin = [0u8; 32];
        let cut = 5;
        let proof = prove_edges(&trie, &origin, Some(&keys[cut - 1]));
        let more = verify_range(root, &origin, &keys[..cut], &vals[..cut], &proof).unwrap();
        assert!(more);
    }

    #[test]
    fn test_middle_chunk_with_nonzero_origin() {
        let (keys, vals, root, trie) = fixture(12);
        let origin = keys[4].clone();
        let proof = prove_edges(&trie, &origin, Some(&keys[8]));
        let more = verify_range(root, &origin, &keys[4..=8], &vals[4..=8], &proof).unwrap();
        assert!(more);

        // Tail chunk exhausts the trie.
        let proof = prove_edges(&trie, &keys[8], Some(keys.last().unwrap()));
        let more = verify_range(root, &keys[8], &keys[8..], &vals[8..], &proof).unwrap();
        assert!(!more);
    }

    #[test]
    fn test_tampered_value_fails() {
        let (keys, mut vals, root, trie) = fixture(8);
        let origin = [0u8; 32];
        let proof = prove_edges(&trie, &origin, Some(keys.last().unwrap()));
        vals[3] = b"bogus".to_vec();
        let err = verify_range(root, &origin, &keys, &vals, &proof).unwrap_err();
        assert!(matches!(err, TrieError::WrongRoot { .. }));
    }

    #[test]
    fn test_missing_key_fails() {
        let (keys, vals, root, trie) = fixture(8);
        let origin = [0u8; 32];
        let proof = prove_edges(&trie, &origin, Some(keys.last().unwrap()));
        let mut keys2 = keys.clone();
        let mut vals2 = vals.clone();
        keys2.remove(3);
        vals2.remove(3);
        let err = verify_range(root, &origin, &keys2, &vals2, &proof).unwrap_err();
        assert!(matches!(err, TrieError::WrongRoot { .. }));
    }

    #[test]
    fn test_false_emptiness_claim_fails() {
        let (_keys, _vals, root, trie) = fixture(8);
        let origin = [0u8; 32];
        let proof = prove_edges(&trie, &origin, None);
        let err = verify_range(root, &origin, &[], &[], &proof).unwrap_err();
        assert!(matches!(err, TrieError::MoreEntries));
    }

    #[test]
    fn test_true_emptiness_past_last_key() {
        let (keys, _vals, root, trie) = fixture(8);
        // Origin strictly beyond the greatest key.
        let mut origin = keys.last().unwrap().clone();
        origin[31] = origin[31].wrapping_add(1);
        let proof = prove_edges(&trie, &origin, None);
        let more = verify_range(root, &origin, &[], &[], &proof).unwrap();
        assert!(!more);
    }

    #[test]
    fn test_single_element_at_origin() {
        let (keys, vals, root, trie) = fixture(8);
        let proof = prove_edges(&trie, &keys[2], None);
        let more =
            verify_range(root, &keys[2], &keys[2..3], &vals[2..3], &proof).unwrap();
        assert!(more);

        let last = keys.len() - 1;
        let proof = prove_edges(&trie, &keys[last], None);
        let more =
            verify_range(root, &keys[last], &keys[last..], &vals[last..], &proof).unwrap();
        assert!(!more);
    }

    #[test]
    fn test_empty_trie_range() {
        assert!(!verify_range(EMPTY_ROOT_HASH, &[0u8; 32], &[], &[], &ProofSet::new()).unwrap());
        let err = verify_range(
            EMPTY_ROOT_HASH,
            &[0u8; 32],
            &[key(1)],
            &[b"v".to_vec()],
            &ProofSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TrieError::WrongRoot { .. }));
    }

    #[test]
    fn test_stack_root_agrees_with_builder() {
        let (keys, vals, root, _trie) = fixture(16);
        assert_eq!(stack_root(&keys, &vals), root);
    }
}
