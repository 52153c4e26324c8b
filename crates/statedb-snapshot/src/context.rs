//! Generation context: the flat-state cursor pair, the write batch and the
//! dangling-storage reaper.

use crate::{Marker, SnapshotResult};
use alloy_primitives::B256;
use statedb_storage::keys::{self, HASH_LEN};
use statedb_storage::{ColumnFamily, Storage, WriteBatch};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Rows fetched per scan when a cursor refills its buffer.
const SCAN_CHUNK: usize = 256;

/// Which flat-state namespace a cursor covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterKind {
    Account,
    Storage,
}

impl IterKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            IterKind::Account => "account",
            IterKind::Storage => "storage",
        }
    }
}

/// A prefix-scoped forward cursor over the snapshot column family.
///
/// The cursor never pins a database iterator: it pulls bounded chunks and
/// remembers the next seek key, so it can be re-synchronized with the store
/// (`reopen`) at every flush checkpoint without blocking compaction. The
/// `hold` primitive ungets the last yielded row so the next advance yields
/// it again.
pub(crate) struct SnapshotIterator {
    db: Arc<dyn Storage>,
    prefix: Vec<u8>,
    next_seek: Vec<u8>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    held: Option<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl SnapshotIterator {
    /// Open a cursor over `prefix`, positioned at `prefix ++ start`.
    pub(crate) fn new(db: Arc<dyn Storage>, prefix: Vec<u8>, start: &[u8]) -> Self {
        let mut next_seek = prefix.clone();
        next_seek.extend_from_slice(start);
        Self {
            db,
            prefix,
            next_seek,
            buffer: VecDeque::new(),
            held: None,
            exhausted: false,
        }
    }

    /// Advance to the next row inside the namespace.
    pub(crate) fn next(&mut self) -> SnapshotResult<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(row) = self.held.take() {
            return Ok(Some(row));
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.refill()?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Unget the row last returned by `next`; the following `next` yields it
    /// again. Only one row deep.
    pub(crate) fn hold(&mut self, row: (Vec<u8>, Vec<u8>)) {
        self.held = Some(row);
    }

    /// Drop buffered rows so the next advance re-reads the store from the
    /// current position. A held row survives.
    pub(crate) fn reopen(&mut self) {
        if let Some((front, _)) = self.buffer.front() {
            self.next_seek = front.clone();
        }
        self.buffer.clear();
        self.exhausted = false;
    }

    fn refill(&mut self) -> SnapshotResult<()> {
        let rows = self
            .db
            .scan_from(ColumnFamily::Snapshot, &self.next_seek, SCAN_CHUNK)?;
        let fetched = rows.len();
        for (key, value) in rows {
            if !key.starts_with(&self.prefix) {
                self.exhausted = true;
                break;
            }
            self.buffer.push_back((key, value));
        }
        if fetched < SCAN_CHUNK {
            self.exhausted = true;
        }
        if let Some((last, _)) = self.buffer.back() {
            // Successor key: fixed-width rows make "append a zero byte" the
            // correct strict upper bound for the next seek.
            let mut seek = last.clone();
            seek.push(0);
            self.next_seek = seek;
        }
        Ok(())
    }
}

/// Everything one generation run owns: the cursor pair, the pending batch
/// and the wall-clock of the last progress log.
pub(crate) struct GeneratorContext {
    pub(crate) root: B256,
    pub(crate) db: Arc<dyn Storage>,
    pub(crate) batch: WriteBatch,
    pub(crate) logged: Instant,
    account_iter: SnapshotIterator,
    storage_iter: SnapshotIterator,
}

impl GeneratorContext {
    /// Open the cursors at the positions encoded in the resume marker. Rows
    /// before the marker are assumed correct; the account (and possibly one
    /// storage slot) at the marker is re-processed, which is idempotent.
    pub(crate) fn new(root: B256, db: Arc<dyn Storage>, marker: &Marker) -> Self {
        let account_start = marker
            .account()
            .map(|hash| hash.as_slice().to_vec())
            .unwrap_or_default();
        let storage_start = marker.as_bytes().unwrap_or_default();
        Self {
            root,
            account_iter: SnapshotIterator::new(
                db.clone(),
                keys::account_namespace(),
                &account_start,
            ),
            storage_iter: SnapshotIterator::new(
                db.clone(),
                keys::storage_namespace(),
                &storage_start,
            ),
            db,
            batch: WriteBatch::new(),
            logged: Instant::now(),
        }
    }

    pub(crate) fn iterator(&mut self, kind: IterKind) -> &mut SnapshotIterator {
        match kind {
            IterKind::Account => &mut self.account_iter,
            IterKind::Storage => &mut self.storage_iter,
        }
    }

    /// Re-synchronize a cursor with the store after a flush.
    pub(crate) fn reopen_iterator(&mut self, kind: IterKind) {
        self.iterator(kind).reopen();
    }

    /// Delete up to `max` storage rows whose owner sorts before `account`.
    /// Such rows were not claimed by any earlier account: they are dangling.
    ///
    /// The reaper only queues deletes; it never commits. Returns the number
    /// of removed rows and whether the sweep is complete, so the generator
    /// loop can interleave its flush checkpoint between slices.
    pub(crate) fn remove_storage_before(
        &mut self,
        account: &B256,
        max: usize,
    ) -> SnapshotResult<(u64, bool)> {
        let mut count = 0u64;
        while (count as usize) < max {
            let Some((key, value)) = self.storage_iter.next()? else {
                return Ok((count, true));
            };
            if owner_of(&key) >= account.as_slice() {
                self.storage_iter.hold((key, value));
                return Ok((count, true));
            }
            self.batch.delete(ColumnFamily::Snapshot, key);
            count += 1;
        }
        Ok((count, false))
    }

    /// Delete up to `max` storage rows owned by `account` (used when the
    /// account was deleted or turned into a plain account). Returns whether
    /// the sweep is complete.
    pub(crate) fn remove_storage_at(&mut self, account: &B256, max: usize) -> SnapshotResult<bool> {
        let mut count = 0usize;
        while count < max {
            let Some((key, value)) = self.storage_iter.next()? else {
                return Ok(true);
            };
            if owner_of(&key) > account.as_slice() {
                self.storage_iter.hold((key, value));
                return Ok(true);
            }
            self.batch.delete(ColumnFamily::Snapshot, key);
            count += 1;
        }
        Ok(false)
    }

    /// Delete up to `max` storage rows left past the last processed account;
    /// all of them are dangling. Returns the number of removed rows and
    /// whether the namespace is drained.
    pub(crate) fn remove_remaining_storage(&mut self, max: usize) -> SnapshotResult<(u64, bool)> {
        let mut count = 0u64;
        while (count as usize) < max {
            let Some((key, _)) = self.storage_iter.next()? else {
                return Ok((count, true));
            };
            self.batch.delete(ColumnFamily::Snapshot, key);
            count += 1;
        }
        Ok((count, false))
    }
}

/// Owner hash slice of a storage snapshot key. Malformed short keys yield
/// an empty slice, which sorts first and gets reaped.
fn owner_of(key: &[u8]) -> &[u8] {
    key.get(1..1 + HASH_LEN).unwrap_or(&[])
}
