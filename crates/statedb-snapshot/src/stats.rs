//! Generation statistics.

use crate::Marker;
use alloy_primitives::B256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Monotonic counters covering the whole life cycle of a generator. Readers
/// may observe them without synchronization; the values are advisory and the
/// element at a resume point may be counted twice.
#[derive(Debug)]
pub struct GeneratorStats {
    start: Instant,
    accounts: AtomicU64,
    slots: AtomicU64,
    storage: AtomicU64,
    dangling: AtomicU64,
}

impl Default for GeneratorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorStats {
    /// Fresh counters starting now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            accounts: AtomicU64::new(0),
            slots: AtomicU64::new(0),
            storage: AtomicU64::new(0),
            dangling: AtomicU64::new(0),
        }
    }

    /// Restore the persisted counters after a resume.
    pub(crate) fn restore(&self, accounts: u64, slots: u64, storage: u64) {
        self.accounts.store(accounts, Ordering::Relaxed);
        self.slots.store(slots, Ordering::Relaxed);
        self.storage.store(storage, Ordering::Relaxed);
    }

    pub(crate) fn bump_accounts(&self) {
        self.accounts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_slots(&self) {
        self.slots.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_storage(&self, bytes: u64) {
        self.storage.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_dangling(&self, count: u64) {
        self.dangling.fetch_add(count, Ordering::Relaxed);
    }

    /// Accounts processed so far.
    pub fn accounts(&self) -> u64 {
        self.accounts.load(Ordering::Relaxed)
    }

    /// Storage slots processed so far.
    pub fn slots(&self) -> u64 {
        self.slots.load(Ordering::Relaxed)
    }

    /// Estimated snapshot bytes written so far.
    pub fn storage(&self) -> u64 {
        self.storage.load(Ordering::Relaxed)
    }

    /// Dangling storage rows removed so far.
    pub fn dangling(&self) -> u64 {
        self.dangling.load(Ordering::Relaxed)
    }

    /// Emit a structured progress line.
    pub(crate) fn log_progress(&self, msg: &str, root: B256, marker: &Marker) {
        info!(
            %root,
            %marker,
            accounts = self.accounts(),
            slots = self.slots(),
            storage = self.storage(),
            dangling = self.dangling(),
            elapsed_ms = self.start.elapsed().as_millis() as u64,
            "{msg}"
        );
    }
}
