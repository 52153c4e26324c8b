//! Range prover: decide cheaply whether a flat-state segment already
//! matches the authoritative trie.

use crate::context::{GeneratorContext, IterKind};
use crate::{SnapshotError, SnapshotResult};
use alloy_primitives::hex;
use statedb_storage::keys::HASH_LEN;
use statedb_trie::{stack_root, DiskNodeReader, ProofSet, Trie, TrieError, TrieId};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Value transform applied to rows before proving (e.g. slim-to-full
/// account re-encoding).
pub(crate) type ValueTransform = fn(&[u8]) -> Result<Vec<u8>, alloy_rlp::Error>;

/// Output of range proving, usable regardless of whether proving succeeded.
pub(crate) struct ProofResult {
    /// Key suffixes of all iterated rows, even when proving failed.
    pub keys: Vec<Vec<u8>>,
    /// Values of all iterated rows, transformed when a transform is set.
    pub vals: Vec<Vec<u8>>,
    /// The store had more rows than the segment bound allowed.
    pub disk_more: bool,
    /// The trie continues past the segment (meaningful on success only).
    pub trie_more: bool,
    /// Why the segment failed to prove; `None` means the segment is valid.
    pub proof_err: Option<TrieError>,
    /// The trie handle, when the prover resolved one (reused by fallback).
    pub trie: Option<Trie>,
}

impl ProofResult {
    /// Whether the range proof succeeded.
    pub fn valid(&self) -> bool {
        self.proof_err.is_none()
    }

    /// The last iterated key, regardless of proving success.
    pub fn last(&self) -> Option<&[u8]> {
        self.keys.last().map(|key| key.as_slice())
    }
}

/// Prove that the flat rows under `prefix`, starting at `origin` and capped
/// at `max` elements, form a contiguous prefix of the trie at
/// `trie_id.root`.
///
/// A failed proof is an outcome, not an error: it is recorded in the result
/// and triggers fallback reconciliation downstream. The only hard failures
/// are a cursor yielding keys before its lower bound (store corruption) and
/// a missing trie (generation pauses).
pub(crate) fn prove_range(
    ctx: &mut GeneratorContext,
    trie_id: TrieId,
    prefix: &[u8],
    kind: IterKind,
    origin: Option<&[u8]>,
    max: usize,
    transform: Option<ValueTransform>,
) -> SnapshotResult<ProofResult> {
    let mut keys: Vec<Vec<u8>> = Vec::new();
    let mut vals: Vec<Vec<u8>> = Vec::new();
    let mut disk_more = false;

    let mut min = prefix.to_vec();
    min.extend_from_slice(origin.unwrap_or_default());

    let iter = ctx.iterator(kind);
    loop {
        let Some((key, value)) = iter.next()? else {
            break;
        };
        // The cursor resumes at the last hold position; anything before the
        // segment's lower bound means the store misbehaved.
        if key < min {
            return Err(SnapshotError::InvalidIteratorPosition);
        }
        // Leaving the prefix means the namespace is fully visited; unget the
        // foreign row for whoever scans next.
        if !key.starts_with(prefix) {
            iter.hold((key, value));
            break;
        }
        if keys.len() == max {
            iter.hold((key, value));
            disk_more = true;
            break;
        }
        keys.push(key[prefix.len()..].to_vec());
        match transform {
            None => vals.push(value),
            Some(convert) => match convert(&value) {
                Ok(converted) => vals.push(converted),
                Err(err) => {
                    // Keep the raw value to stay aligned with the keys; the
                    // fallback pass re-derives the row from the trie.
                    error!(%err, "Failed to convert account state data");
                    vals.push(value);
                }
            },
        }
    }

    // The flat namespace is fully covered by this segment: rebuilding the
    // root from scratch replaces Merkle proving outright.
    let root = trie_id.root;
    if origin.is_none() && !disk_more {
        let have = stack_root(&keys, &vals);
        let proof_err = (have != root).then(|| TrieError::WrongRoot { have, want: root });
        return Ok(ProofResult {
            keys,
            vals,
            disk_more: false,
            trie_more: false,
            proof_err,
            trie: None,
        });
    }

    // Chunked segment: authenticate the window with two edge proofs.
    let reader = Arc::new(DiskNodeReader::new(ctx.db.clone()));
    let trie = match Trie::open(trie_id, reader) {
        Ok(trie) => trie,
        Err(TrieError::MissingTrie(_)) => {
            info!(state = %ctx.root, kind = kind.as_str(), root = %trie_id.root,
                "Trie missing, snapshotting paused");
            return Err(SnapshotError::MissingTrie);
        }
        Err(err) => return Err(err.into()),
    };

    let origin_key = origin
        .map(|bytes| bytes.to_vec())
        .unwrap_or_else(|| vec![0u8; HASH_LEN]);
    let mut proof = ProofSet::new();
    if let Err(err) = trie.prove(&origin_key, &mut proof) {
        debug!(kind = kind.as_str(), origin = %hex::encode(&origin_key), %err,
            "Failed to prove range");
        return Ok(ProofResult {
            keys,
            vals,
            disk_more,
            trie_more: false,
            proof_err: Some(err),
            trie: Some(trie),
        });
    }
    if let Some(last) = keys.last().cloned() {
        if let Err(err) = trie.prove(&last, &mut proof) {
            debug!(kind = kind.as_str(), last = %hex::encode(&last), %err,
                "Failed to prove range");
            return Ok(ProofResult {
                keys,
                vals,
                disk_more,
                trie_more: false,
                proof_err: Some(err),
                trie: Some(trie),
            });
        }
    }

    match statedb_trie::verify_range(root, &origin_key, &keys, &vals, &proof) {
        Ok(cont) => Ok(ProofResult {
            keys,
            vals,
            disk_more,
            trie_more: cont,
            proof_err: None,
            trie: Some(trie),
        }),
        Err(err) => Ok(ProofResult {
            keys,
            vals,
            disk_more,
            trie_more: false,
            proof_err: Some(err),
            trie: Some(trie),
        }),
    }
}
