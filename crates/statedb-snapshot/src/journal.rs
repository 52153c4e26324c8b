//! Generator journal record.
//!
//! The record is written under the same atomic batch as the data writes it
//! describes, so the persisted marker never runs ahead of the rows that were
//! supposed to precede it. It is a standalone record: persisting it
//! independently of any wider system journal is safe.

use crate::{GeneratorStats, Marker, SnapshotResult};
use alloy_primitives::{Bytes, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use statedb_storage::keys::{GENERATOR_JOURNAL_KEY, SNAPSHOT_ROOT_KEY};
use statedb_storage::{ColumnFamily, Storage, WriteBatch};
use tracing::{debug, warn};

/// Persisted generator state.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GeneratorRecord {
    /// Whether generation ran to completion.
    pub done: bool,
    /// Raw progress marker; empty when `done`.
    pub marker: Bytes,
    /// Accounts processed.
    pub accounts: u64,
    /// Storage slots processed.
    pub slots: u64,
    /// Estimated snapshot bytes written.
    pub storage: u64,
}

impl GeneratorRecord {
    /// The tagged marker this record encodes.
    pub fn progress(&self) -> Marker {
        Marker::decode(self.done, &self.marker)
    }
}

/// Queue the journal record for `marker` into the batch.
pub(crate) fn write_record(batch: &mut WriteBatch, marker: &Marker, stats: &GeneratorStats) {
    let record = GeneratorRecord {
        done: marker.is_done(),
        marker: Bytes::from(marker.as_bytes().unwrap_or_default()),
        accounts: stats.accounts(),
        slots: stats.slots(),
        storage: stats.storage(),
    };
    let mut blob = Vec::with_capacity(64);
    record.encode(&mut blob);
    debug!(progress = %marker, "Journalled generator progress");
    batch.put(ColumnFamily::Metadata, GENERATOR_JOURNAL_KEY, blob);
}

/// Load the journal record, if any. An unreadable record is treated as
/// absent: the generator restarts from genesis rather than trusting it.
pub(crate) fn load_record(db: &dyn Storage) -> SnapshotResult<Option<GeneratorRecord>> {
    let Some(blob) = db.get(ColumnFamily::Metadata, GENERATOR_JOURNAL_KEY)? else {
        return Ok(None);
    };
    let mut slice = blob.as_slice();
    match GeneratorRecord::decode(&mut slice) {
        Ok(record) => Ok(Some(record)),
        Err(err) => {
            warn!(%err, "Discarding unreadable generator journal");
            Ok(None)
        }
    }
}

/// Read back the root hash the snapshot was generated against.
pub fn load_snapshot_root(db: &dyn Storage) -> SnapshotResult<Option<B256>> {
    let Some(blob) = db.get(ColumnFamily::Metadata, SNAPSHOT_ROOT_KEY)? else {
        return Ok(None);
    };
    if blob.len() != 32 {
        warn!("Discarding malformed snapshot root record");
        return Ok(None);
    }
    Ok(Some(B256::from_slice(&blob)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let record = GeneratorRecord {
            done: false,
            marker: Bytes::from(vec![0x11; 32]),
            accounts: 42,
            slots: 1000,
            storage: 123_456,
        };
        let mut blob = Vec::new();
        record.encode(&mut blob);
        let mut slice = blob.as_slice();
        assert_eq!(GeneratorRecord::decode(&mut slice).unwrap(), record);
        assert_eq!(
            record.progress(),
            Marker::Account(B256::repeat_byte(0x11))
        );
    }

    #[test]
    fn test_done_record_has_nil_marker() {
        let record = GeneratorRecord {
            done: true,
            marker: Bytes::new(),
            accounts: 1,
            slots: 0,
            storage: 10,
        };
        assert_eq!(record.progress(), Marker::Done);
    }
}
