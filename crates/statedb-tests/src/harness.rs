//! Test harness for integration tests.
//!
//! Provides a temp-dir database wrapper, fixture builders that materialize
//! authoritative account/storage tries into the node store, snapshot row
//! seeding, and helpers to drive a generator to completion.

use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable};
use statedb_snapshot::{account, Generator, GeneratorConfig, GeneratorRecord, Marker};
use statedb_storage::keys;
use statedb_storage::{ColumnFamily, Database, Storage};
use statedb_trie::{persist_nodes, TrieAccount, TrieBuilder, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// How long scenario tests wait for background generation to finish.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Test database wrapper that cleans up on drop.
pub struct TestDatabase {
    db: Database,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("Failed to open database");
        Self {
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Shared storage handle for constructing generators and readers.
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::new(self.db.clone())
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Builder for an authoritative state: accounts plus per-contract storage.
#[derive(Default)]
pub struct StateBuilder {
    accounts: BTreeMap<B256, TrieAccount>,
    storages: BTreeMap<B256, BTreeMap<B256, Vec<u8>>>,
}

impl StateBuilder {
    /// Start an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain account with the given balance.
    pub fn eoa(mut self, hash: B256, balance: u64) -> Self {
        self.accounts.insert(
            hash,
            TrieAccount {
                nonce: 0,
                balance: U256::from(balance),
                storage_root: EMPTY_ROOT_HASH,
                code_hash: KECCAK_EMPTY,
            },
        );
        self
    }

    /// Add a contract account with the given storage slots. The storage
    /// root is computed at commit time.
    pub fn contract(
        mut self,
        hash: B256,
        balance: u64,
        slots: impl IntoIterator<Item = (B256, Vec<u8>)>,
    ) -> Self {
        self.accounts.insert(
            hash,
            TrieAccount {
                nonce: 1,
                balance: U256::from(balance),
                storage_root: EMPTY_ROOT_HASH,
                code_hash: B256::repeat_byte(0xcc),
            },
        );
        self.storages.insert(hash, slots.into_iter().collect());
        self
    }

    /// Materialize every trie into the node store and return the fixture.
    pub fn commit(mut self, db: &dyn Storage) -> FixtureState {
        for (owner, slots) in &self.storages {
            if slots.is_empty() {
                continue;
            }
            let mut builder = TrieBuilder::new();
            for (slot, value) in slots {
                builder.insert(slot.as_slice(), value).unwrap();
            }
            let (root, nodes) = builder.commit();
            persist_nodes(db, &nodes).unwrap();
            self.accounts
                .get_mut(owner)
                .expect("contract accounts are registered before their storage")
                .storage_root = root;
        }
        let mut builder = TrieBuilder::new();
        for (hash, acc) in &self.accounts {
            builder
                .insert(hash.as_slice(), &account::full_bytes(acc))
                .unwrap();
        }
        let (root, nodes) = builder.commit();
        persist_nodes(db, &nodes).unwrap();
        FixtureState {
            root,
            accounts: self.accounts,
            storages: self.storages,
        }
    }
}

/// A committed authoritative state and the rows its snapshot must contain.
pub struct FixtureState {
    /// State root of the account trie.
    pub root: B256,
    /// Account hash to account record.
    pub accounts: BTreeMap<B256, TrieAccount>,
    /// Owner hash to slot map.
    pub storages: BTreeMap<B256, BTreeMap<B256, Vec<u8>>>,
}

impl FixtureState {
    /// The slim rows a fully generated snapshot holds for this state.
    pub fn expected_account_rows(&self) -> BTreeMap<B256, Vec<u8>> {
        self.accounts
            .iter()
            .map(|(hash, acc)| (*hash, account::slim_bytes(acc)))
            .collect()
    }

    /// The storage rows a fully generated snapshot holds for this state.
    pub fn expected_storage_rows(&self) -> BTreeMap<(B256, B256), Vec<u8>> {
        self.storages
            .iter()
            .flat_map(|(owner, slots)| {
                slots
                    .iter()
                    .map(|(slot, value)| ((*owner, *slot), value.clone()))
            })
            .collect()
    }

    /// Write the complete, correct snapshot mirror of this state.
    pub fn seed_full_snapshot(&self, db: &dyn Storage) {
        for (hash, row) in self.expected_account_rows() {
            seed_account_row(db, &hash, &row);
        }
        for ((owner, slot), value) in self.expected_storage_rows() {
            seed_storage_row(db, &owner, &slot, &value);
        }
    }
}

/// Write an account snapshot row directly (bypassing the generator).
pub fn seed_account_row(db: &dyn Storage, hash: &B256, value: &[u8]) {
    db.put(ColumnFamily::Snapshot, &keys::account_key(&hash.0), value)
        .unwrap();
}

/// Write a storage snapshot row directly.
pub fn seed_storage_row(db: &dyn Storage, owner: &B256, slot: &B256, value: &[u8]) {
    db.put(
        ColumnFamily::Snapshot,
        &keys::storage_key(&owner.0, &slot.0),
        value,
    )
    .unwrap();
}

/// Persist a resume point: snapshot root plus a journal record, as a prior
/// interrupted cycle would have left them.
pub fn seed_progress(db: &dyn Storage, root: B256, marker: &Marker, accounts: u64, slots: u64) {
    db.put(
        ColumnFamily::Metadata,
        keys::SNAPSHOT_ROOT_KEY,
        root.as_slice(),
    )
    .unwrap();
    let record = GeneratorRecord {
        done: marker.is_done(),
        marker: marker.as_bytes().unwrap_or_default().into(),
        accounts,
        slots,
        storage: 0,
    };
    let mut blob = Vec::new();
    record.encode(&mut blob);
    db.put(ColumnFamily::Metadata, keys::GENERATOR_JOURNAL_KEY, &blob)
        .unwrap();
}

/// Decode the journalled progress record straight from the store, the way
/// a restarted generator would see it.
pub fn journalled_progress(db: &dyn Storage) -> Option<Marker> {
    let blob = db
        .get(ColumnFamily::Metadata, keys::GENERATOR_JOURNAL_KEY)
        .unwrap()?;
    let mut slice = blob.as_slice();
    let record = GeneratorRecord::decode(&mut slice).ok()?;
    Some(record.progress())
}

/// Read back one account row.
pub fn account_row(db: &dyn Storage, hash: &B256) -> Option<Vec<u8>> {
    db.get(ColumnFamily::Snapshot, &keys::account_key(&hash.0))
        .unwrap()
}

/// Read back one storage row.
pub fn storage_row(db: &dyn Storage, owner: &B256, slot: &B256) -> Option<Vec<u8>> {
    db.get(ColumnFamily::Snapshot, &keys::storage_key(&owner.0, &slot.0))
        .unwrap()
}

/// Enumerate the whole snapshot column family, split by namespace.
#[allow(clippy::type_complexity)]
pub fn snapshot_rows(
    db: &dyn Storage,
) -> (BTreeMap<B256, Vec<u8>>, BTreeMap<(B256, B256), Vec<u8>>) {
    let mut accounts = BTreeMap::new();
    let mut storages = BTreeMap::new();
    let mut seek: Vec<u8> = Vec::new();
    loop {
        let rows = db.scan_from(ColumnFamily::Snapshot, &seek, 1024).unwrap();
        let fetched = rows.len();
        for (key, value) in rows {
            if let Some(hash) = keys::parse_account_key(&key) {
                accounts.insert(B256::from(hash), value);
            } else if let Some((owner, slot)) = keys::parse_storage_key(&key) {
                storages.insert((B256::from(owner), B256::from(slot)), value);
            }
            seek = key;
            seek.push(0);
        }
        if fetched < 1024 {
            break;
        }
    }
    (accounts, storages)
}

/// Assert the snapshot mirrors the fixture exactly, key for key.
pub fn assert_converged(db: &dyn Storage, fixture: &FixtureState) {
    let (accounts, storages) = snapshot_rows(db);
    assert_eq!(
        accounts,
        fixture.expected_account_rows(),
        "account namespace diverges from the trie"
    );
    assert_eq!(
        storages,
        fixture.expected_storage_rows(),
        "storage namespace diverges from the trie"
    );
}

/// A config with tiny batches so every callback hits a flush checkpoint.
pub fn eager_flush_config() -> GeneratorConfig {
    GeneratorConfig {
        ideal_batch_size: 1,
        ..GeneratorConfig::default()
    }
}

/// Run a fresh generator against `root` until completion and return it.
pub fn run_to_completion(db: &TestDatabase, root: B256, config: GeneratorConfig) -> Generator {
    let mut generator = Generator::new(db.storage(), config).unwrap();
    generator.run(root);
    assert!(
        generator.wait_done(GENERATION_TIMEOUT),
        "snapshot generation did not complete in time"
    );
    generator.stop();
    generator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{account_hash, slot_key, slot_value};

    #[test]
    fn test_fixture_commit_exposes_tries() {
        let db = TestDatabase::new();
        let fixture = StateBuilder::new()
            .eoa(account_hash(0x11), 7)
            .contract(account_hash(0x22), 100, [(slot_key(1), slot_value(1))])
            .commit(&*db.storage());

        assert_ne!(fixture.root, EMPTY_ROOT_HASH);
        let contract = &fixture.accounts[&account_hash(0x22)];
        assert_ne!(contract.storage_root, EMPTY_ROOT_HASH);
        assert_eq!(fixture.expected_account_rows().len(), 2);
        assert_eq!(fixture.expected_storage_rows().len(), 1);
    }

    #[test]
    fn test_snapshot_rows_roundtrip() {
        let db = TestDatabase::new();
        let storage = db.storage();
        seed_account_row(&*storage, &account_hash(0x11), b"acc");
        seed_storage_row(&*storage, &account_hash(0x22), &slot_key(1), b"slot");

        let (accounts, storages) = snapshot_rows(&*storage);
        assert_eq!(accounts[&account_hash(0x11)], b"acc".to_vec());
        assert_eq!(
            storages[&(account_hash(0x22), slot_key(1))],
            b"slot".to_vec()
        );
    }
}
