//! Background snapshot generator.
//!
//! One worker thread per generator instance walks the account namespace
//! (and, per contract, the storage namespace), reconciling the flat mirror
//! against the authoritative trie segment by segment. The owner drives the
//! generator through `run`/`stop`; those two must not race each other.

use crate::context::{GeneratorContext, IterKind};
use crate::range::generate_range;
use crate::{account, journal, GeneratorConfig, GeneratorStats, Marker, SnapshotError, SnapshotResult};
use alloy_primitives::B256;
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use parking_lot::RwLock;
use statedb_storage::keys::{self, HASH_LEN};
use statedb_storage::{ColumnFamily, Storage, WriteBatch};
use statedb_trie::TrieId;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Wall-clock interval between periodic progress log lines.
const LOG_INTERVAL: Duration = Duration::from_secs(8);

/// Upper limit of rows one dangling-reap slice deletes before the loop
/// revisits the flush checkpoint.
const REAP_CHECK_RANGE: usize = 1024;

/// Add one to a big-endian key, with carry. `None` when the addition
/// overflows the key width; that is the segment loop's termination path.
fn increment(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    for i in (0..out.len()).rev() {
        out[i] = out[i].wrapping_add(1);
        if out[i] != 0 {
            return Some(out);
        }
    }
    None
}

/// Left-truncating, right-aligned conversion of a key suffix to a hash.
/// Well-formed suffixes are exactly hash-wide, so this is the identity for
/// every row the generator itself writes.
fn hash_from_suffix(key: &[u8]) -> B256 {
    let mut out = B256::ZERO;
    let take = key.len().min(HASH_LEN);
    out.0[HASH_LEN - take..].copy_from_slice(&key[key.len() - take..]);
    out
}

/// The state snapshot generator.
///
/// `run`, `stop` and the read accessors are safe to call from any thread,
/// but the owner must serialize `run` against `stop`.
pub struct Generator {
    db: Arc<dyn Storage>,
    config: GeneratorConfig,
    stats: Arc<GeneratorStats>,
    progress: Arc<RwLock<Marker>>,
    running: bool,
    abort_tx: Option<SyncSender<Sender<()>>>,
    done_rx: Option<Receiver<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Generator {
    /// Construct a generator, restoring progress and statistics from the
    /// persisted journal record when one exists.
    pub fn new(db: Arc<dyn Storage>, config: GeneratorConfig) -> SnapshotResult<Self> {
        let record = journal::load_record(db.as_ref())?;
        let progress = record
            .as_ref()
            .map(|record| record.progress())
            .unwrap_or(Marker::Empty);
        let stats = GeneratorStats::new();
        if let Some(record) = &record {
            stats.restore(record.accounts, record.slots, record.storage);
        }
        Ok(Self {
            db,
            config,
            stats: Arc::new(stats),
            progress: Arc::new(RwLock::new(progress)),
            running: false,
            abort_tx: None,
            done_rx: None,
            handle: None,
        })
    }

    /// Start background generation against `root`. If a previous cycle is
    /// still running it is stopped first, persisting its progress.
    pub fn run(&mut self, root: B256) {
        if self.running {
            self.stop();
            warn!("Paused the leftover generation cycle");
        }
        // Re-running a completed generator regenerates from genesis.
        {
            let mut progress = self.progress.write();
            if progress.is_done() {
                *progress = Marker::Empty;
            }
        }
        let resume = self.progress.read().clone();

        let (abort_tx, abort_rx) = mpsc::sync_channel::<Sender<()>>(0);
        let (done_tx, done_rx) = mpsc::channel();
        self.abort_tx = Some(abort_tx);
        self.done_rx = Some(done_rx);

        let worker = Worker {
            db: self.db.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            progress: self.progress.clone(),
            root,
        };
        let handle = thread::Builder::new()
            .name("snapshot-generator".into())
            .spawn(move || worker.generate(resume, abort_rx, done_tx))
            .expect("Failed to spawn snapshot generator thread");
        self.handle = Some(handle);
        self.running = true;
        info!(%root, "Started snapshot generation");
    }

    /// Synchronously terminate the background generation. Progress made so
    /// far is persisted before this returns. No-op when not running.
    pub fn stop(&mut self) {
        if !self.running {
            debug!("Snapshot generation is not running");
            return;
        }
        if let Some(abort_tx) = self.abort_tx.take() {
            let (ack_tx, ack_rx) = mpsc::channel::<()>();
            if abort_tx.send(ack_tx).is_ok() {
                // The worker acknowledges by closing the reply channel.
                let _ = ack_rx.recv();
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.done_rx = None;
        self.running = false;
    }

    /// Whether generation ran to completion.
    pub fn completed(&self) -> bool {
        self.progress.read().is_done()
    }

    /// The current progress marker. It may lag the actual position by up to
    /// one flush interval; the lag only narrows what may be served.
    pub fn progress(&self) -> Marker {
        self.progress.read().clone()
    }

    /// Life-cycle statistics.
    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    /// Block until the running generation completes, up to `timeout`.
    /// Returns whether completion was observed.
    pub fn wait_done(&mut self, timeout: Duration) -> bool {
        if self.progress.read().is_done() {
            return true;
        }
        match &self.done_rx {
            Some(done_rx) => done_rx.recv_timeout(timeout).is_ok(),
            None => false,
        }
    }
}

/// State moved onto the worker thread.
struct Worker {
    db: Arc<dyn Storage>,
    config: GeneratorConfig,
    stats: Arc<GeneratorStats>,
    progress: Arc<RwLock<Marker>>,
    root: B256,
}

impl Worker {
    /// Worker entry point: generate until exhaustion or interruption, then
    /// park until the owner acknowledges.
    fn generate(self, resume: Marker, abort_rx: Receiver<Sender<()>>, done_tx: Sender<()>) {
        self.stats
            .log_progress("Resuming snapshot generation", self.root, &resume);

        // First ever cycle: persist the target root and the genesis marker
        // before any data is written.
        if resume == Marker::Empty {
            let mut batch = WriteBatch::new();
            batch.put(
                ColumnFamily::Metadata,
                keys::SNAPSHOT_ROOT_KEY,
                self.root.as_slice(),
            );
            journal::write_record(&mut batch, &resume, &self.stats);
            if let Err(err) = self.db.write_batch(batch) {
                error!(%err, "Failed to write initialized state marker");
                park(&abort_rx);
                return;
            }
        }
        let mut ctx = GeneratorContext::new(self.root, self.db.clone(), &resume);
        match self.generate_accounts(&mut ctx, &abort_rx, &resume) {
            Err(SnapshotError::Aborted(ack)) => {
                // Progress for the batch was persisted at the checkpoint;
                // closing the reply channel completes the handshake.
                drop(ack);
                return;
            }
            Err(err) => {
                if !matches!(err, SnapshotError::MissingTrie) {
                    error!(%err, "Snapshot generation failed");
                }
                // Keep the stop handshake alive even after a failure so the
                // owner never blocks.
                park(&abort_rx);
                return;
            }
            Ok(()) => {}
        }

        // Exhausted: persist the completion record even when there is
        // nothing left to commit.
        journal::write_record(&mut ctx.batch, &Marker::Done, &self.stats);
        if let Err(err) = self.db.write_batch(ctx.batch.take()) {
            error!(%err, "Failed to flush batch");
            park(&abort_rx);
            return;
        }
        info!(
            accounts = self.stats.accounts(),
            slots = self.stats.slots(),
            storage = self.stats.storage(),
            dangling = self.stats.dangling(),
            "Generated snapshot"
        );
        *self.progress.write() = Marker::Done;
        let _ = done_tx.send(());

        // Someone will be looking for us, wait it out.
        park(&abort_rx);
    }

    /// Account pass: reconcile the account namespace segment by segment,
    /// descending into contract storage per account.
    fn generate_accounts(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        resume: &Marker,
    ) -> SnapshotResult<()> {
        let mut acc_marker = resume.account();
        let resume_storage = match resume {
            Marker::Storage(_, origin) => Some(origin.clone()),
            _ => None,
        };
        let namespace = keys::account_namespace();
        let mut origin: Option<Vec<u8>> = acc_marker.map(|hash| hash.as_slice().to_vec());
        loop {
            let mut on_account =
                |ctx: &mut GeneratorContext, key: &[u8], val: &[u8], write: bool, delete: bool| {
                    self.on_account(
                        ctx,
                        abort_rx,
                        &mut acc_marker,
                        resume_storage.as_deref(),
                        key,
                        val,
                        write,
                        delete,
                    )
                };
            let outcome = generate_range(
                ctx,
                TrieId::state(self.root),
                &namespace,
                IterKind::Account,
                origin.as_deref(),
                self.config.account_check_range,
                &mut on_account,
                Some(account::slim_to_full),
            )?;

            let next_origin = outcome.last.as_deref().and_then(increment);
            if outcome.exhausted || next_origin.is_none() {
                // Everything after the final account is dangling.
                self.reap_remaining_storage(ctx, abort_rx)?;
                break;
            }
            origin = next_origin;
        }
        Ok(())
    }

    /// Per-account callback of the account pass.
    #[allow(clippy::too_many_arguments)]
    fn on_account(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        acc_marker: &mut Option<B256>,
        resume_storage: Option<&[u8]>,
        key: &[u8],
        val: &[u8],
        write: bool,
        delete: bool,
    ) -> SnapshotResult<()> {
        let account = hash_from_suffix(key);

        // Storage whose owner sorts before this account belongs to no one.
        self.reap_storage_before(ctx, abort_rx, &account)?;

        if delete {
            let mut row = keys::account_namespace();
            row.extend_from_slice(key);
            ctx.batch.delete(ColumnFamily::Snapshot, row);
            self.reap_storage_at(ctx, abort_rx, &account)?;
            return Ok(());
        }
        let decoded = account::decode_full(val).map_err(|err| {
            error!(%err, "Invalid account encountered during snapshot creation");
            SnapshotError::CorruptedAccount(err.to_string())
        })?;

        // The account at the resume point was already written and counted
        // by the previous cycle.
        let resumed_here = *acc_marker == Some(account);
        if !resumed_here {
            let data_len = if write {
                let slim = account::slim_bytes(&decoded);
                let len = slim.len();
                ctx.batch
                    .put(ColumnFamily::Snapshot, keys::account_key(&account.0), slim);
                len
            } else {
                // Approximate persisted size without re-encoding.
                let mut len = val.len();
                if decoded.code_hash == KECCAK_EMPTY {
                    len -= 32;
                }
                if decoded.storage_root == EMPTY_ROOT_HASH {
                    len -= 32;
                }
                len
            };
            self.stats.add_storage((1 + HASH_LEN + data_len) as u64);
            self.stats.bump_accounts();
        }

        // While the resumed account is still in flight, the published marker
        // must keep its storage component; shrinking it to the bare account
        // would claim storage coverage not yet re-verified.
        let marker = match resume_storage {
            Some(origin) if resumed_here => Marker::Storage(account, origin.to_vec()),
            _ => Marker::Account(account),
        };
        self.check_and_flush(ctx, abort_rx, &marker)?;

        if decoded.storage_root == EMPTY_ROOT_HASH {
            self.reap_storage_at(ctx, abort_rx, &account)?;
        } else {
            let store_marker = if resumed_here {
                resume_storage.map(|origin| origin.to_vec())
            } else {
                None
            };
            self.generate_storages(ctx, abort_rx, account, decoded.storage_root, store_marker)?;
        }
        // The resume special cases only apply to the first processed account.
        *acc_marker = None;
        Ok(())
    }

    /// Storage pass: reconcile one contract's storage namespace.
    fn generate_storages(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        account: B256,
        storage_root: B256,
        store_marker: Option<Vec<u8>>,
    ) -> SnapshotResult<()> {
        let prefix = keys::storage_owner_prefix(&account.0);
        let mut origin = store_marker;
        loop {
            let mut on_storage =
                |ctx: &mut GeneratorContext, key: &[u8], val: &[u8], write: bool, delete: bool| {
                    self.on_storage(ctx, abort_rx, &account, key, val, write, delete)
                };
            let outcome = generate_range(
                ctx,
                TrieId::storage(account, storage_root),
                &prefix,
                IterKind::Storage,
                origin.as_deref(),
                self.config.storage_check_range,
                &mut on_storage,
                None,
            )?;
            if outcome.exhausted {
                break;
            }
            match outcome.last.as_deref().and_then(increment) {
                Some(next) => origin = Some(next),
                // The last slot sits at the very top of the key space.
                None => break,
            }
        }
        Ok(())
    }

    /// Per-slot callback of the storage pass.
    #[allow(clippy::too_many_arguments)]
    fn on_storage(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        account: &B256,
        key: &[u8],
        val: &[u8],
        write: bool,
        delete: bool,
    ) -> SnapshotResult<()> {
        let mut row = keys::storage_owner_prefix(&account.0);
        row.extend_from_slice(key);
        if delete {
            ctx.batch.delete(ColumnFamily::Snapshot, row);
            return Ok(());
        }
        if write {
            ctx.batch.put(ColumnFamily::Snapshot, row, val);
        }
        self.stats
            .add_storage((1 + 2 * HASH_LEN + val.len()) as u64);
        self.stats.bump_slots();

        self.check_and_flush(ctx, abort_rx, &Marker::Storage(*account, key.to_vec()))
    }

    /// Sweep dangling storage rows before `account` in bounded slices,
    /// revisiting the flush checkpoint between slices. The deletes commit
    /// through the same batch-plus-journal path as every other write; the
    /// marker republished between slices is the current one, so coverage is
    /// never over-claimed.
    fn reap_storage_before(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        account: &B256,
    ) -> SnapshotResult<()> {
        loop {
            let (removed, done) = ctx.remove_storage_before(account, REAP_CHECK_RANGE)?;
            self.stats.add_dangling(removed);
            if done {
                return Ok(());
            }
            let current = self.progress.read().clone();
            self.check_and_flush(ctx, abort_rx, &current)?;
        }
    }

    /// Sweep the storage rows owned by `account` in bounded slices. Owned
    /// rows are not dangling; the counter stays untouched.
    fn reap_storage_at(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        account: &B256,
    ) -> SnapshotResult<()> {
        loop {
            if ctx.remove_storage_at(account, REAP_CHECK_RANGE)? {
                return Ok(());
            }
            let current = self.progress.read().clone();
            self.check_and_flush(ctx, abort_rx, &current)?;
        }
    }

    /// Sweep everything left in the storage namespace after the final
    /// account, in bounded slices through the flush checkpoint.
    fn reap_remaining_storage(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
    ) -> SnapshotResult<()> {
        loop {
            let (removed, done) = ctx.remove_remaining_storage(REAP_CHECK_RANGE)?;
            self.stats.add_dangling(removed);
            if done {
                return Ok(());
            }
            let current = self.progress.read().clone();
            self.check_and_flush(ctx, abort_rx, &current)?;
        }
    }

    /// Flush checkpoint: commit the batch together with a journal record
    /// when it grows past the ideal size or an interrupt arrived, publish
    /// the new marker, and re-synchronize the cursors with the store.
    fn check_and_flush(
        &self,
        ctx: &mut GeneratorContext,
        abort_rx: &Receiver<Sender<()>>,
        current: &Marker,
    ) -> SnapshotResult<()> {
        let mut abort = abort_rx.try_recv().ok();

        if ctx.batch.value_size() >= self.config.ideal_batch_size || abort.is_some() {
            {
                let stored = self.progress.read();
                if current.is_before(&stored) {
                    error!(current = %current, stored = %*stored,
                        "Snapshot generator went backwards");
                }
            }
            // Persist the marker even when the batch carries no data: a
            // fully correct range is progress with nothing to commit.
            journal::write_record(&mut ctx.batch, current, &self.stats);
            self.db.write_batch(ctx.batch.take())?;
            *self.progress.write() = current.clone();

            if let Some(ack) = abort.take() {
                self.stats
                    .log_progress("Aborting snapshot generation", ctx.root, current);
                return Err(SnapshotError::Aborted(ack));
            }
            // Long-held cursors block compaction; rebuild them from the
            // store at their current positions.
            ctx.reopen_iterator(IterKind::Account);
            ctx.reopen_iterator(IterKind::Storage);
        }
        if ctx.logged.elapsed() > LOG_INTERVAL {
            self.stats
                .log_progress("Generating snapshot", ctx.root, &self.progress.read());
            ctx.logged = Instant::now();
        }
        Ok(())
    }
}

/// Wait for a stop request and acknowledge it by closing the reply channel.
/// Keeps `stop` from blocking forever after errors or completion.
fn park(abort_rx: &Receiver<Sender<()>>) {
    if let Ok(ack) = abort_rx.recv() {
        drop(ack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment() {
        assert_eq!(increment(&[0x00, 0x00]), Some(vec![0x00, 0x01]));
        assert_eq!(increment(&[0x00, 0xff]), Some(vec![0x01, 0x00]));
        assert_eq!(increment(&[0xff, 0xfe]), Some(vec![0xff, 0xff]));
        assert_eq!(increment(&[0xff, 0xff]), None);
        assert_eq!(increment(&[]), None);
    }

    #[test]
    fn test_hash_from_suffix() {
        let full = [0x42u8; 32];
        assert_eq!(hash_from_suffix(&full), B256::repeat_byte(0x42));

        let short = [0x01u8, 0x02];
        let padded = hash_from_suffix(&short);
        assert_eq!(&padded.0[30..], short.as_slice());
        assert_eq!(padded.0[..30], [0u8; 30]);
    }
}
