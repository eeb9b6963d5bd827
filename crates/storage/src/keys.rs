//! Keyspace layout. Every record type lives under its own name prefix.

use alloy_primitives::U256;
use commander_smt::{Hash, MerklePath};

use crate::error::StorageError;

pub(crate) const STATE_LEAF_PREFIX: &[u8] = b"StateLeaf:";
pub(crate) const STATE_UPDATE_PREFIX: &[u8] = b"StateUpdate:";
pub(crate) const ACCOUNT_LEAF_PREFIX: &[u8] = b"AccountLeaf:";
pub(crate) const PENDING_TX_PREFIX: &[u8] = b"PendingTxs:";
pub(crate) const PENDING_STATE_PREFIX: &[u8] = b"PendingAccountState:";
pub(crate) const PENDING_PUBKEY_BALANCE_PREFIX: &[u8] = b"PendingPubKeyBalance:";
pub(crate) const BATCHED_TX_PREFIX: &[u8] = b"BatchedTx:";
pub(crate) const FAILED_TX_PREFIX: &[u8] = b"FailedTx:";
pub(crate) const COMMITMENT_PREFIX: &[u8] = b"Commitment:";
pub(crate) const BATCH_PREFIX: &[u8] = b"Batch:";
pub(crate) const PENDING_DEPOSIT_PREFIX: &[u8] = b"PendingDeposit:";
pub(crate) const PENDING_DEPOSIT_SUBTREE_PREFIX: &[u8] = b"PendingDepositSubtree:";

pub(crate) const ACCOUNT_PUBLIC_KEY_INDEX: &str = "AccountLeaf.PublicKey";
pub(crate) const BATCHED_TX_SLOT_INDEX: &str = "BatchedTx.CommitmentSlot";
pub(crate) const BATCH_HASH_INDEX: &str = "Batch.Hash";

fn key(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|part| part.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Suffix of a key after `prefix`
pub(crate) fn suffix<'a>(key: &'a [u8], prefix: &[u8]) -> &'a [u8] {
    key.get(prefix.len()..).unwrap_or_default()
}

pub(crate) fn merkle_node_key(namespace: &str, path: MerklePath) -> Vec<u8> {
    key(
        b"MerkleNode:",
        &[namespace.as_bytes(), b":".as_slice(), path.to_bytes().as_slice()],
    )
}

pub(crate) fn state_leaf_key(state_id: u32) -> Vec<u8> {
    key(STATE_LEAF_PREFIX, &[state_id.to_be_bytes().as_slice()])
}

pub(crate) fn state_update_key(id: u64) -> Vec<u8> {
    key(STATE_UPDATE_PREFIX, &[id.to_be_bytes().as_slice()])
}

pub(crate) fn account_leaf_key(pub_key_id: u32) -> Vec<u8> {
    key(ACCOUNT_LEAF_PREFIX, &[pub_key_id.to_be_bytes().as_slice()])
}

/// Prefix of all pending transactions sent from `state_id`
pub(crate) fn pending_tx_account_prefix(state_id: u32) -> Vec<u8> {
    key(PENDING_TX_PREFIX, &[state_id.to_be_bytes().as_slice(), b":".as_slice()])
}

pub(crate) fn pending_tx_key_u64(state_id: u32, nonce: u64) -> Vec<u8> {
    let mut key = pending_tx_account_prefix(state_id);
    key.extend_from_slice(&nonce.to_be_bytes());
    key
}

pub(crate) fn pending_tx_key(state_id: u32, nonce: U256) -> Result<Vec<u8>, StorageError> {
    let nonce = u64::try_from(nonce).map_err(|_| StorageError::NonceTooLarge(nonce))?;
    Ok(pending_tx_key_u64(state_id, nonce))
}

pub(crate) fn pending_state_key(state_id: u32) -> Vec<u8> {
    key(PENDING_STATE_PREFIX, &[state_id.to_be_bytes().as_slice()])
}

pub(crate) fn pending_pubkey_balance_key(public_key: &[u8]) -> Vec<u8> {
    key(PENDING_PUBKEY_BALANCE_PREFIX, &[public_key])
}

pub(crate) fn batched_tx_key(hash: &Hash) -> Vec<u8> {
    key(BATCHED_TX_PREFIX, &[hash.as_slice()])
}

pub(crate) fn failed_tx_key(hash: &Hash) -> Vec<u8> {
    key(FAILED_TX_PREFIX, &[hash.as_slice()])
}

pub(crate) fn commitment_batch_prefix(batch_id: &U256) -> Vec<u8> {
    key(COMMITMENT_PREFIX, &[batch_id.to_be_bytes::<32>().as_slice()])
}

pub(crate) fn commitment_key(batch_id: &U256, index_in_batch: u8) -> Vec<u8> {
    let mut key = commitment_batch_prefix(batch_id);
    key.push(index_in_batch);
    key
}

pub(crate) fn batch_key(id: &U256) -> Vec<u8> {
    key(BATCH_PREFIX, &[id.to_be_bytes::<32>().as_slice()])
}

pub(crate) fn pending_deposit_key(subtree_id: &U256, deposit_index: &U256) -> Vec<u8> {
    key(
        PENDING_DEPOSIT_PREFIX,
        &[
            subtree_id.to_be_bytes::<32>().as_slice(),
            deposit_index.to_be_bytes::<32>().as_slice(),
        ],
    )
}

pub(crate) fn pending_deposit_subtree_key(id: &U256) -> Vec<u8> {
    key(PENDING_DEPOSIT_SUBTREE_PREFIX, &[id.to_be_bytes::<32>().as_slice()])
}

/// Decode a big-endian `u32` key suffix
pub(crate) fn decode_u32(bytes: &[u8]) -> Result<u32, StorageError> {
    <[u8; 4]>::try_from(bytes)
        .map(u32::from_be_bytes)
        .map_err(|_| StorageError::InvalidLength("key"))
}

/// Decode a big-endian `u64` key suffix
pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| StorageError::InvalidLength("key"))
}

/// Decode a big-endian 256-bit key part
pub(crate) fn decode_u256(bytes: &[u8]) -> Result<U256, StorageError> {
    <[u8; 32]>::try_from(bytes)
        .map(U256::from_be_bytes)
        .map_err(|_| StorageError::InvalidLength("key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_do_not_nest() {
        let prefixes = [
            STATE_LEAF_PREFIX,
            STATE_UPDATE_PREFIX,
            ACCOUNT_LEAF_PREFIX,
            PENDING_TX_PREFIX,
            PENDING_STATE_PREFIX,
            PENDING_PUBKEY_BALANCE_PREFIX,
            BATCHED_TX_PREFIX,
            FAILED_TX_PREFIX,
            COMMITMENT_PREFIX,
            BATCH_PREFIX,
            PENDING_DEPOSIT_PREFIX,
            PENDING_DEPOSIT_SUBTREE_PREFIX,
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!b.starts_with(a), "{a:?} is a prefix of {b:?}");
                }
            }
        }
    }

    #[test]
    fn test_pending_tx_keys_sort_by_sender_then_nonce() {
        let mut keys = vec![
            pending_tx_key_u64(2, 0),
            pending_tx_key_u64(1, 256),
            pending_tx_key_u64(1, 3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                pending_tx_key_u64(1, 3),
                pending_tx_key_u64(1, 256),
                pending_tx_key_u64(2, 0),
            ]
        );
        assert!(pending_tx_key_u64(1, 3).starts_with(&pending_tx_account_prefix(1)));
    }

    #[test]
    fn test_huge_nonce_is_rejected() {
        assert_eq!(
            pending_tx_key(1, U256::MAX),
            Err(StorageError::NonceTooLarge(U256::MAX))
        );
    }

    #[test]
    fn test_decode_key_parts() {
        assert_eq!(decode_u32(&7u32.to_be_bytes()).unwrap(), 7);
        assert_eq!(decode_u64(&9u64.to_be_bytes()).unwrap(), 9);
        assert!(decode_u32(&[1, 2]).is_err());
        assert_eq!(
            suffix(&state_leaf_key(5), STATE_LEAF_PREFIX),
            5u32.to_be_bytes().as_slice()
        );
    }
}
