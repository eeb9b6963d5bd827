//! Commitments as they appear in rollup calldata

use alloy_primitives::U256;
use commander_smt::{Hash, Keccak256Hasher};
use commander_storage::Signature;
use serde::{Deserialize, Serialize};

use crate::error::ProverError;

/// Width of one Create2Transfer in a commitment's transaction bytes:
/// from state, to state, receiver public key ID, then amount and fee as
/// 16-bit decimals.
pub const CREATE2_TRANSFER_LENGTH: usize = 16;

/// A transfer-like commitment decoded from a submitted batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedCommitment {
    /// State root after the commitment
    pub state_root: Hash,
    /// Aggregated signature of all transactions
    pub combined_signature: Signature,
    /// State credited with the fees
    pub fee_receiver: u32,
    /// Compactly encoded transactions
    pub transactions: Vec<u8>,
}

impl DecodedCommitment {
    /// Hash of the commitment body under `account_root`
    pub fn body_hash(&self, account_root: &Hash) -> Hash {
        Keccak256Hasher::hash_parts(&[
            account_root.as_slice(),
            self.combined_signature.as_bytes().as_slice(),
            U256::from(self.fee_receiver).to_be_bytes::<32>().as_slice(),
            &self.transactions,
        ])
    }

    /// Receiver public key IDs of the Create2Transfers in this commitment,
    /// in transaction order
    pub fn create2_transfer_receivers(&self) -> Result<Vec<u32>, ProverError> {
        if self.transactions.len() % CREATE2_TRANSFER_LENGTH != 0 {
            return Err(ProverError::InvalidTransactionsLength(self.transactions.len()));
        }
        Ok(self
            .transactions
            .chunks_exact(CREATE2_TRANSFER_LENGTH)
            .map(|tx| u32::from_be_bytes([tx[8], tx[9], tx[10], tx[11]]))
            .collect())
    }
}
