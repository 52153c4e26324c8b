//! Generation progress marker.
//!
//! The marker encodes "everything up to and including this key has been
//! reconciled". It is kept as a tagged variant in memory and only collapses
//! to raw bytes at the persistence boundary:
//!
//! - empty bytes: not yet advanced past genesis
//! - 32 bytes: completed through this account
//! - 64 bytes: mid-contract; account hash followed by the storage origin
//! - absent (`done` flag set): generation complete

use alloy_primitives::{hex, B256};
use statedb_storage::keys::HASH_LEN;
use std::fmt;

/// Tagged progress marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Generation has not advanced past genesis.
    Empty,
    /// Generation completed through this account, inclusive.
    Account(B256),
    /// Mid-contract resume point: the account and the storage-key origin
    /// within that account.
    Storage(B256, Vec<u8>),
    /// Generation complete.
    Done,
}

impl Marker {
    /// Rebuild a marker from its persisted form.
    pub fn decode(done: bool, raw: &[u8]) -> Self {
        if done {
            return Marker::Done;
        }
        match raw.len() {
            0 => Marker::Empty,
            HASH_LEN => Marker::Account(B256::from_slice(raw)),
            n if n > HASH_LEN => Marker::Storage(
                B256::from_slice(&raw[..HASH_LEN]),
                raw[HASH_LEN..].to_vec(),
            ),
            // A truncated marker cannot be trusted; restart from genesis.
            _ => Marker::Empty,
        }
    }

    /// Raw byte form; `None` once generation is complete.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Marker::Empty => Some(Vec::new()),
            Marker::Account(hash) => Some(hash.as_slice().to_vec()),
            Marker::Storage(hash, origin) => {
                let mut out = Vec::with_capacity(HASH_LEN + origin.len());
                out.extend_from_slice(hash.as_slice());
                out.extend_from_slice(origin);
                Some(out)
            }
            Marker::Done => None,
        }
    }

    /// Whether generation is complete.
    pub fn is_done(&self) -> bool {
        matches!(self, Marker::Done)
    }

    /// The account component, when one is recorded.
    pub fn account(&self) -> Option<B256> {
        match self {
            Marker::Account(hash) | Marker::Storage(hash, _) => Some(*hash),
            Marker::Empty | Marker::Done => None,
        }
    }

    /// The storage origin recorded for `account`, when the marker points
    /// into that account's storage.
    pub fn storage_origin(&self, account: &B256) -> Option<Vec<u8>> {
        match self {
            Marker::Storage(hash, origin) if hash == account => Some(origin.clone()),
            _ => None,
        }
    }

    /// Byte-lexicographic "strictly before" over the persisted forms, with
    /// the completed marker ordered after everything.
    pub fn is_before(&self, other: &Marker) -> bool {
        match (self.as_bytes(), other.as_bytes()) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Empty => write!(f, "empty"),
            Marker::Account(hash) => write!(f, "{hash}"),
            Marker::Storage(hash, origin) => {
                write!(f, "{hash}:0x{}", hex::encode(origin))
            }
            Marker::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let markers = [
            Marker::Empty,
            Marker::Account(B256::repeat_byte(0x11)),
            Marker::Storage(B256::repeat_byte(0x11), vec![0x80; 32]),
        ];
        for marker in markers {
            let raw = marker.as_bytes().unwrap();
            assert_eq!(Marker::decode(false, &raw), marker);
        }
        assert!(Marker::Done.as_bytes().is_none());
        assert_eq!(Marker::decode(true, &[]), Marker::Done);
    }

    #[test]
    fn test_account_split() {
        let acc = B256::repeat_byte(0x22);
        let marker = Marker::Storage(acc, vec![0x01, 0x02]);
        assert_eq!(marker.account(), Some(acc));
        assert_eq!(marker.storage_origin(&acc), Some(vec![0x01, 0x02]));
        assert_eq!(marker.storage_origin(&B256::repeat_byte(0x33)), None);
        assert_eq!(Marker::Empty.account(), None);
    }

    #[test]
    fn test_ordering() {
        let a = Marker::Account(B256::repeat_byte(0x11));
        let b = Marker::Account(B256::repeat_byte(0x22));
        assert!(Marker::Empty.is_before(&a));
        assert!(a.is_before(&b));
        assert!(!b.is_before(&a));
        assert!(b.is_before(&Marker::Done));
        assert!(!Marker::Done.is_before(&b));

        // A storage marker extends its account marker.
        let mid = Marker::Storage(B256::repeat_byte(0x11), vec![0x00]);
        assert!(a.is_before(&mid));
        assert!(mid.is_before(&b));
    }
}
