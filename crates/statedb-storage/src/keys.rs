//! Key layout of the flat state namespaces.
//!
//! All snapshot rows live in [`ColumnFamily::Snapshot`](crate::ColumnFamily)
//! behind a one-byte namespace prefix, so that the account space and the
//! storage space form two contiguous, independently scannable key ranges.
//! Singleton records live in `ColumnFamily::Metadata` under fixed keys.

/// Hash width of account and slot keys.
pub const HASH_LEN: usize = 32;

/// Namespace prefix of account snapshot rows: `0x01 ‖ account_hash`.
pub const ACCOUNT_PREFIX: u8 = 0x01;

/// Namespace prefix of storage snapshot rows: `0x02 ‖ owner_hash ‖ slot_hash`.
pub const STORAGE_PREFIX: u8 = 0x02;

/// Full length of an account snapshot key.
pub const ACCOUNT_KEY_LEN: usize = 1 + HASH_LEN;

/// Full length of a storage snapshot key.
pub const STORAGE_KEY_LEN: usize = 1 + 2 * HASH_LEN;

/// Metadata key holding the root hash the snapshot was generated against.
pub const SNAPSHOT_ROOT_KEY: &[u8] = b"snapshot-root";

/// Metadata key holding the generator journal record.
pub const GENERATOR_JOURNAL_KEY: &[u8] = b"snapshot-generator";

/// Build the key of an account snapshot row.
pub fn account_key(account_hash: &[u8; HASH_LEN]) -> [u8; ACCOUNT_KEY_LEN] {
    let mut out = [0u8; ACCOUNT_KEY_LEN];
    out[0] = ACCOUNT_PREFIX;
    out[1..].copy_from_slice(account_hash);
    out
}

/// Build the key of a storage snapshot row.
pub fn storage_key(
    owner_hash: &[u8; HASH_LEN],
    slot_hash: &[u8; HASH_LEN],
) -> [u8; STORAGE_KEY_LEN] {
    let mut out = [0u8; STORAGE_KEY_LEN];
    out[0] = STORAGE_PREFIX;
    out[1..1 + HASH_LEN].copy_from_slice(owner_hash);
    out[1 + HASH_LEN..].copy_from_slice(slot_hash);
    out
}

/// The namespace prefix of the whole account space.
pub fn account_namespace() -> Vec<u8> {
    vec![ACCOUNT_PREFIX]
}

/// The namespace prefix of the whole storage space.
pub fn storage_namespace() -> Vec<u8> {
    vec![STORAGE_PREFIX]
}

/// The namespace prefix of one contract's storage range: `0x02 ‖ owner_hash`.
pub fn storage_owner_prefix(owner_hash: &[u8; HASH_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + HASH_LEN);
    out.push(STORAGE_PREFIX);
    out.extend_from_slice(owner_hash);
    out
}

/// Split an account snapshot key into its account hash.
pub fn parse_account_key(raw: &[u8]) -> Option<[u8; HASH_LEN]> {
    if raw.len() != ACCOUNT_KEY_LEN || raw[0] != ACCOUNT_PREFIX {
        return None;
    }
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&raw[1..]);
    Some(hash)
}

/// Split a storage snapshot key into `(owner_hash, slot_hash)`.
pub fn parse_storage_key(raw: &[u8]) -> Option<([u8; HASH_LEN], [u8; HASH_LEN])> {
    if raw.len() != STORAGE_KEY_LEN || raw[0] != STORAGE_PREFIX {
        return None;
    }
    let mut owner = [0u8; HASH_LEN];
    let mut slot = [0u8; HASH_LEN];
    owner.copy_from_slice(&raw[1..1 + HASH_LEN]);
    slot.copy_from_slice(&raw[1 + HASH_LEN..]);
    Some((owner, slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key_roundtrip() {
        let hash = [0x11u8; 32];
        let key = account_key(&hash);
        assert_eq!(key.len(), ACCOUNT_KEY_LEN);
        assert_eq!(key[0], ACCOUNT_PREFIX);
        assert_eq!(parse_account_key(&key), Some(hash));
        assert_eq!(parse_account_key(&key[..32]), None);
    }

    #[test]
    fn test_storage_key_roundtrip() {
        let owner = [0x22u8; 32];
        let slot = [0x33u8; 32];
        let key = storage_key(&owner, &slot);
        assert_eq!(key.len(), STORAGE_KEY_LEN);
        assert_eq!(parse_storage_key(&key), Some((owner, slot)));
        assert_eq!(parse_account_key(&key), None);
    }

    #[test]
    fn test_namespaces_are_disjoint_and_ordered() {
        // Every account key sorts below every storage key, so the two
        // namespaces can be scanned independently with one cursor each.
        let acc = account_key(&[0xffu8; 32]);
        let sto = storage_key(&[0x00u8; 32], &[0x00u8; 32]);
        assert!(acc.as_slice() < sto.as_slice());

        let prefix = storage_owner_prefix(&[0x22u8; 32]);
        let key = storage_key(&[0x22u8; 32], &[0x00u8; 32]);
        assert!(key.starts_with(&prefix));
    }
}
