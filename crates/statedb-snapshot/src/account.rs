//! Account encodings.
//!
//! The trie stores accounts in the full four-field RLP form. The flat
//! snapshot stores a slim form in which an empty storage root and an empty
//! code hash shrink to empty byte strings. The prover converts slim rows
//! back to the full form before proving, so both sides compare equal.

use alloy_primitives::{Bytes, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use alloy_trie::{TrieAccount, EMPTY_ROOT_HASH, KECCAK_EMPTY};

/// Slim account wire form.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
struct SlimAccount {
    nonce: u64,
    balance: alloy_primitives::U256,
    root: Bytes,
    code_hash: Bytes,
}

/// Encode an account in the full (trie leaf) form.
pub fn full_bytes(account: &TrieAccount) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    account.encode(&mut out);
    out
}

/// Decode an account from the full form.
pub fn decode_full(raw: &[u8]) -> Result<TrieAccount, alloy_rlp::Error> {
    let mut slice = raw;
    TrieAccount::decode(&mut slice)
}

/// Encode an account in the slim (snapshot row) form.
pub fn slim_bytes(account: &TrieAccount) -> Vec<u8> {
    let slim = SlimAccount {
        nonce: account.nonce,
        balance: account.balance,
        root: if account.storage_root == EMPTY_ROOT_HASH {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(account.storage_root.as_slice())
        },
        code_hash: if account.code_hash == KECCAK_EMPTY {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(account.code_hash.as_slice())
        },
    };
    let mut out = Vec::with_capacity(128);
    slim.encode(&mut out);
    out
}

/// Convert a slim row into the full form. This is the prover's value
/// transform for the account namespace; a failure is not fatal upstream.
pub fn slim_to_full(raw: &[u8]) -> Result<Vec<u8>, alloy_rlp::Error> {
    let mut slice = raw;
    let slim = SlimAccount::decode(&mut slice)?;
    let storage_root = match slim.root.len() {
        0 => EMPTY_ROOT_HASH,
        32 => B256::from_slice(&slim.root),
        _ => return Err(alloy_rlp::Error::Custom("invalid storage root width")),
    };
    let code_hash = match slim.code_hash.len() {
        0 => KECCAK_EMPTY,
        32 => B256::from_slice(&slim.code_hash),
        _ => return Err(alloy_rlp::Error::Custom("invalid code hash width")),
    };
    let account = TrieAccount {
        nonce: slim.nonce,
        balance: slim.balance,
        storage_root,
        code_hash,
    };
    Ok(full_bytes(&account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn eoa() -> TrieAccount {
        TrieAccount {
            nonce: 0,
            balance: U256::from(7u64),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
        }
    }

    fn contract() -> TrieAccount {
        TrieAccount {
            nonce: 3,
            balance: U256::from(1_000_000u64),
            storage_root: B256::repeat_byte(0x42),
            code_hash: B256::repeat_byte(0x99),
        }
    }

    #[test]
    fn test_slim_roundtrip() {
        for account in [eoa(), contract()] {
            let slim = slim_bytes(&account);
            let full = slim_to_full(&slim).unwrap();
            assert_eq!(decode_full(&full).unwrap(), account);
        }
    }

    #[test]
    fn test_slim_drops_empty_hashes() {
        let slim_eoa = slim_bytes(&eoa());
        let slim_contract = slim_bytes(&contract());
        // Two 32-byte hashes shrink to empty strings for plain accounts.
        assert!(slim_eoa.len() + 60 < slim_contract.len());
        assert!(slim_eoa.len() < full_bytes(&eoa()).len());
    }

    #[test]
    fn test_slim_to_full_rejects_garbage() {
        assert!(slim_to_full(b"\x01\x02\x03").is_err());
    }

    #[test]
    fn test_full_roundtrip() {
        let account = contract();
        assert_eq!(decode_full(&full_bytes(&account)).unwrap(), account);
    }
}
