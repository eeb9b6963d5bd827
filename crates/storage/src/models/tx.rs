use alloy_primitives::U256;
use commander_smt::Hash;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
    models::CommitmentId,
    types::{PublicKey, Signature, Timestamp, TxType},
};

/// Type-specific part of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxBody {
    /// Transfer to an existing state
    Transfer {
        /// Receiving state
        to_state_id: u32,
    },
    /// Transfer that creates a state for `to_public_key`
    Create2Transfer {
        /// Created state, known once the transaction is applied
        to_state_id: Option<u32>,
        /// Owner of the created state
        to_public_key: PublicKey,
    },
    /// Withdrawal to a spoke chain
    MassMigration {
        /// Destination spoke
        spoke_id: u32,
    },
}

impl TxBody {
    /// Transaction type of this body
    pub const fn tx_type(&self) -> TxType {
        match self {
            Self::Transfer { .. } => TxType::Transfer,
            Self::Create2Transfer { .. } => TxType::Create2Transfer,
            Self::MassMigration { .. } => TxType::MassMigration,
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Transfer { to_state_id } => buf.put_u32(*to_state_id),
            Self::Create2Transfer {
                to_state_id,
                to_public_key,
            } => {
                buf.put_option(to_state_id.as_ref(), 4, |buf, id| buf.put_u32(*id));
                buf.extend_from_slice(to_public_key.as_bytes());
            }
            Self::MassMigration { spoke_id } => buf.put_u32(*spoke_id),
        }
    }

    fn read(tx_type: TxType, reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        Ok(match tx_type {
            TxType::Transfer => Self::Transfer {
                to_state_id: reader.u32()?,
            },
            TxType::Create2Transfer => Self::Create2Transfer {
                to_state_id: reader.option(Reader::u32)?,
                to_public_key: PublicKey(reader.array()?),
            },
            TxType::MassMigration => Self::MassMigration {
                spoke_id: reader.u32()?,
            },
        })
    }
}

/// A signed transaction as admitted to the mempool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    /// Transaction hash
    pub hash: Hash,
    /// Sending state
    pub from_state_id: u32,
    /// Amount moved
    pub amount: U256,
    /// Fee paid to the commitment's fee receiver
    pub fee: U256,
    /// Sender nonce
    pub nonce: U256,
    /// Sender signature
    pub signature: Signature,
    /// When the commander received the transaction
    pub receive_time: Option<Timestamp>,
    /// Type-specific fields
    pub body: TxBody,
}

impl PendingTx {
    /// Transaction type
    pub const fn tx_type(&self) -> TxType {
        self.body.tx_type()
    }

    /// Amount plus fee
    pub fn total(&self) -> Result<U256, StorageError> {
        self.amount
            .checked_add(self.fee)
            .ok_or(StorageError::BalanceOverflow)
    }

    /// Receiving state of a transfer
    pub const fn transfer_receiver(&self) -> Option<u32> {
        match self.body {
            TxBody::Transfer { to_state_id } => Some(to_state_id),
            _ => None,
        }
    }

    /// Encode the transaction
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 1 + 4 + 3 * 32 + Signature::LEN + 9 + 133);
        self.write(&mut buf);
        buf
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.hash);
        buf.push(self.tx_type() as u8);
        buf.put_u32(self.from_state_id);
        buf.put_u256(&self.amount);
        buf.put_u256(&self.fee);
        buf.put_u256(&self.nonce);
        buf.extend_from_slice(self.signature.as_bytes());
        buf.put_option(self.receive_time.as_ref(), 8, |buf, time| buf.put_u64(*time));
        self.body.write(buf);
    }

    /// Decode a transaction
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "pending transaction");
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        let hash = reader.hash()?;
        let tx_type = TxType::decode(reader.u8()?);
        Ok(Self {
            hash,
            from_state_id: reader.u32()?,
            amount: reader.u256()?,
            fee: reader.u256()?,
            nonce: reader.u256()?,
            signature: Signature(reader.array()?),
            receive_time: reader.option(Reader::u64)?,
            body: TxBody::read(tx_type, reader)?,
        })
    }
}

/// Position of a transaction inside a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentSlot {
    /// Batch of the commitment
    pub batch_id: U256,
    /// Commitment position in its batch
    pub index_in_batch: u8,
    /// Transaction position in its commitment
    pub index_in_commitment: u32,
}

impl CommitmentSlot {
    /// Encoded width in bytes
    pub const BYTES: usize = 32 + 1 + 4;

    /// Slot of the `index_in_commitment`-th transaction of `commitment_id`
    pub const fn new(commitment_id: CommitmentId, index_in_commitment: u32) -> Self {
        Self {
            batch_id: commitment_id.batch_id,
            index_in_batch: commitment_id.index_in_batch,
            index_in_commitment,
        }
    }

    /// Commitment holding this slot
    pub const fn commitment_id(&self) -> CommitmentId {
        CommitmentId {
            batch_id: self.batch_id,
            index_in_batch: self.index_in_batch,
        }
    }

    /// Big-endian encoding, ordered like the slots themselves
    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut bytes = [0u8; Self::BYTES];
        bytes[..32].copy_from_slice(&self.batch_id.to_be_bytes::<32>());
        bytes[32] = self.index_in_batch;
        bytes[33..].copy_from_slice(&self.index_in_commitment.to_be_bytes());
        bytes
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            batch_id: reader.u256()?,
            index_in_batch: reader.u8()?,
            index_in_commitment: reader.u32()?,
        })
    }
}

/// A transaction included in a commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchedTx {
    /// The transaction
    pub tx: PendingTx,
    /// Where it was included
    pub slot: CommitmentSlot,
}

impl BatchedTx {
    /// Encode the record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.slot.to_bytes().to_vec();
        self.tx.write(&mut buf);
        buf
    }

    /// Decode the record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "batched transaction");
        let slot = CommitmentSlot::read(&mut reader)?;
        let tx = PendingTx::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { tx, slot })
    }
}

/// A transaction rejected while building a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTx {
    /// The transaction
    pub tx: PendingTx,
    /// Why it was rejected
    pub error_message: String,
}

impl FailedTx {
    /// Encode the record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.tx.to_bytes();
        buf.extend_from_slice(self.error_message.as_bytes());
        buf
    }

    /// Decode the record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "failed transaction");
        let tx = PendingTx::read(&mut reader)?;
        let error_message = String::from_utf8(reader.remaining().to_vec())
            .map_err(|_| StorageError::InvalidLength("failed transaction"))?;
        Ok(Self { tx, error_message })
    }
}

/// A transaction paired with the reason it could not be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxError {
    /// The rejected transaction
    pub tx: PendingTx,
    /// Why it was rejected
    pub error_message: String,
}

/// A transaction found in any stage of its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredTx {
    /// Waiting in the mempool
    Pending(PendingTx),
    /// Included in a commitment
    Batched(BatchedTx),
    /// Rejected
    Failed(FailedTx),
}

impl StoredTx {
    /// The underlying transaction
    pub const fn tx(&self) -> &PendingTx {
        match self {
            Self::Pending(tx) => tx,
            Self::Batched(batched) => &batched.tx,
            Self::Failed(failed) => &failed.tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create2transfer() -> PendingTx {
        PendingTx {
            hash: [7u8; 32],
            from_state_id: 1,
            amount: U256::from(100),
            fee: U256::from(5),
            nonce: U256::from(3),
            signature: Signature([9u8; 64]),
            receive_time: None,
            body: TxBody::Create2Transfer {
                to_state_id: Some(12),
                to_public_key: PublicKey([4u8; 128]),
            },
        }
    }

    #[test]
    fn test_create2transfer_codec() {
        let tx = create2transfer();
        let decoded = PendingTx::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.tx_type(), TxType::Create2Transfer);
    }

    #[test]
    fn test_batched_and_failed_records() {
        let tx = PendingTx {
            receive_time: Some(1_700_000_000),
            body: TxBody::MassMigration { spoke_id: 2 },
            ..create2transfer()
        };
        let batched = BatchedTx {
            tx: tx.clone(),
            slot: CommitmentSlot {
                batch_id: U256::from(4),
                index_in_batch: 1,
                index_in_commitment: 30,
            },
        };
        assert_eq!(BatchedTx::from_bytes(&batched.to_bytes()).unwrap(), batched);

        let failed = FailedTx {
            tx,
            error_message: "nonce too low".to_string(),
        };
        assert_eq!(FailedTx::from_bytes(&failed.to_bytes()).unwrap(), failed);
    }

    #[test]
    fn test_total_overflow() {
        let tx = PendingTx {
            amount: U256::MAX,
            ..create2transfer()
        };
        assert_eq!(tx.total(), Err(StorageError::BalanceOverflow));
        assert_eq!(create2transfer().total().unwrap(), U256::from(105));
    }

    #[test]
    fn test_slot_bytes_order_like_slots() {
        let first = CommitmentSlot {
            batch_id: U256::from(1),
            index_in_batch: 3,
            index_in_commitment: 500,
        };
        let second = CommitmentSlot {
            batch_id: U256::from(2),
            index_in_batch: 0,
            index_in_commitment: 0,
        };
        assert!(first < second);
        assert!(first.to_bytes() < second.to_bytes());
    }

    #[test]
    #[should_panic(expected = "unknown transaction type 255")]
    fn test_unknown_type_byte_panics() {
        let mut bytes = create2transfer().to_bytes();
        bytes[32] = 0xff;
        let _ = PendingTx::from_bytes(&bytes);
    }
}
