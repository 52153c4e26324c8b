//! Test data generators for integration tests.
//!
//! Provides deterministic constructors for account hashes, slot keys and
//! slot values used across the snapshot test suites.

use alloy_primitives::B256;

/// A recognizable account hash: the seed byte repeated (`0x11…11` style).
pub fn account_hash(seed: u8) -> B256 {
    B256::repeat_byte(seed)
}

/// A slot key with only the last byte set (`0x00…00NN` style).
pub fn slot_key(index: u8) -> B256 {
    let mut key = B256::ZERO;
    key.0[31] = index;
    key
}

/// A slot key with the two last bytes set, for denser storage layouts.
pub fn slot_key_wide(high: u8, low: u8) -> B256 {
    let mut key = B256::ZERO;
    key.0[30] = high;
    key.0[31] = low;
    key
}

/// An opaque slot value. Values are compared byte-for-byte by the
/// reconciler, nothing more.
pub fn slot_value(value: u8) -> Vec<u8> {
    vec![value]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generators_are_deterministic() {
        assert_eq!(account_hash(0x11), account_hash(0x11));
        assert_eq!(slot_key(0x80).0[31], 0x80);
        assert_eq!(slot_key(0x80).0[..31], [0u8; 31]);
        assert!(slot_key(1) < slot_key(2));
        assert!(slot_key(0xff) < slot_key_wide(1, 0));
    }
}
