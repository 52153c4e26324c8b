//! Segment reconciler: accept a proven segment as-is, or fall back to trie
//! iteration and emit the precise edits that make the mirror match.

use crate::context::{GeneratorContext, IterKind};
use crate::prover::{prove_range, ValueTransform};
use crate::{SnapshotError, SnapshotResult};
use alloy_primitives::{hex, B256};
use statedb_trie::{DiskNodeReader, Trie, TrieBuilder, TrieError, TrieId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Per-element callback of the reconciler.
///
/// - `delete` set: the row (and for accounts, its storage) must be removed.
/// - `write` set: the row must be (re)written with `val`.
/// - neither set: the row is already correct.
///
/// `val` carries the canonical trie encoding (full form for accounts).
pub(crate) type OnState<'a> =
    &'a mut dyn FnMut(&mut GeneratorContext, &[u8], &[u8], bool, bool) -> SnapshotResult<()>;

/// What a reconciliation pass reports back to the segment loop.
pub(crate) struct RangeOutcome {
    /// Both the store and the trie are exhausted for this namespace.
    pub exhausted: bool,
    /// Last key observed by the prover, the next segment's chaining point.
    pub last: Option<Vec<u8>>,
}

/// Reconcile one segment of the namespace under `prefix`.
///
/// A valid proof forwards every row as already-correct. An invalid proof
/// opens a trie iterator seeded with a resolver built from the (mostly
/// overlapping) snapshot rows and merges the two cursors, emitting
/// create/update/unchanged/delete per key.
#[allow(clippy::too_many_arguments)]
pub(crate) fn generate_range(
    ctx: &mut GeneratorContext,
    trie_id: TrieId,
    prefix: &[u8],
    kind: IterKind,
    origin: Option<&[u8]>,
    max: usize,
    on_state: OnState<'_>,
    transform: Option<ValueTransform>,
) -> SnapshotResult<RangeOutcome> {
    let result = prove_range(ctx, trie_id, prefix, kind, origin, max, transform)?;
    let last = result.last().map(|key| key.to_vec());

    if result.valid() {
        trace!(kind = kind.as_str(), last = ?last.as_deref().map(hex::encode),
            "Proved state range");
        for (key, val) in result.keys.iter().zip(&result.vals) {
            on_state(ctx, key, val, false, false)?;
        }
        return Ok(RangeOutcome {
            exhausted: !result.disk_more && !result.trie_more,
            last,
        });
    }
    debug!(kind = kind.as_str(), last = ?last.as_deref().map(hex::encode),
        err = ?result.proof_err,
        "Detected outdated state range");

    // Build a resolver from the stale rows: when divergences are local, the
    // trie iterator resolves almost every node from memory instead of disk.
    let resolver: Option<HashMap<B256, Vec<u8>>> = if result.keys.is_empty() {
        None
    } else {
        let mut seeded = TrieBuilder::new();
        let mut ok = true;
        for (key, val) in result.keys.iter().zip(&result.vals) {
            if let Err(err) = seeded.insert(key, val) {
                warn!(%err, "Skipping snapshot-seeded resolver");
                ok = false;
                break;
            }
        }
        ok.then(|| seeded.commit().1)
    };

    // Reuse the trie handle the prover already resolved, if any.
    let trie = match result.trie {
        Some(trie) => trie,
        None => {
            let reader = Arc::new(DiskNodeReader::new(ctx.db.clone()));
            match Trie::open(trie_id, reader) {
                Ok(trie) => trie,
                Err(TrieError::MissingTrie(_)) => {
                    info!(state = %ctx.root, kind = kind.as_str(), root = %trie_id.root,
                        "Trie missing, snapshotting paused");
                    return Err(SnapshotError::MissingTrie);
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    let mut iter = trie.iter(origin.unwrap_or_default());
    if let Some(nodes) = resolver {
        iter.add_resolver(nodes);
    }

    let mut trie_more = false;
    let mut kv_index = 0usize;
    let (kvkeys, kvvals) = (&result.keys, &result.vals);

    // Edit counters for the trace line.
    let mut created = 0u64;
    let mut updated = 0u64;
    let mut untouched = 0u64;
    let mut deleted = 0u64;

    for entry in iter.by_ref() {
        // Trie errors are never an expected outcome here; the caller treats
        // them as fatal rather than as an interrupt.
        let (trie_key, trie_val) = entry?;
        if let Some(last) = &last {
            if trie_key.as_slice() > last.as_slice() {
                // Beyond the proven window; the next segment handles it.
                trie_more = true;
                break;
            }
        }
        let mut write = true;
        created += 1;
        while kv_index < kvkeys.len() {
            match kvkeys[kv_index].as_slice().cmp(trie_key.as_slice()) {
                Ordering::Less => {
                    // Stale row the trie does not contain.
                    on_state(ctx, &kvkeys[kv_index], &[], false, true)?;
                    kv_index += 1;
                    deleted += 1;
                    continue;
                }
                Ordering::Equal => {
                    created -= 1;
                    write = kvvals[kv_index] != trie_val;
                    if write {
                        updated += 1;
                    } else {
                        untouched += 1;
                    }
                    kv_index += 1;
                }
                Ordering::Greater => {}
            }
            break;
        }
        on_state(ctx, &trie_key, &trie_val, write, false)?;
    }

    // Drain rows past the trie's end: the trie does not contain them.
    while kv_index < kvkeys.len() {
        on_state(ctx, &kvkeys[kv_index], &[], false, true)?;
        kv_index += 1;
        deleted += 1;
    }

    trace!(root = %trie_id.root, last = ?last.as_deref().map(hex::encode),
        created, updated, untouched, deleted, "Regenerated state range");

    Ok(RangeOutcome {
        exhausted: !trie_more && !result.disk_more,
        last,
    })
}
