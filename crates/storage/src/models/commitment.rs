use alloy_primitives::U256;
use commander_smt::{Hash, Keccak256Hasher};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
    models::PendingDeposit,
    types::{BatchType, Signature},
};

/// Position of a commitment: its batch and its index within that batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentId {
    /// Batch of the commitment
    pub batch_id: U256,
    /// Position in the batch
    pub index_in_batch: u8,
}

/// Fields shared by transfer and create-to-transfer commitments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCommitmentBody {
    /// State credited with the fees
    pub fee_receiver: u32,
    /// Aggregated signature of all transactions
    pub combined_signature: Signature,
    /// Hash of the on-chain body, known once the batch is submitted
    pub body_hash: Option<Hash>,
}

impl TxCommitmentBody {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.fee_receiver);
        buf.extend_from_slice(self.combined_signature.as_bytes());
        buf.put_option(self.body_hash.as_ref(), 32, |buf, hash| buf.extend_from_slice(hash));
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            fee_receiver: reader.u32()?,
            combined_signature: Signature(reader.array()?),
            body_hash: reader.option(Reader::hash)?,
        })
    }
}

/// Aggregate of a mass migration commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassMigrationMeta {
    /// Destination spoke
    pub spoke_id: u32,
    /// Migrated token
    pub token_id: U256,
    /// Total migrated amount
    pub amount: U256,
    /// State credited with the fees
    pub fee_receiver: u32,
}

/// Mass migration commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassMigrationCommitmentBody {
    /// Fields shared with transfer commitments
    pub tx: TxCommitmentBody,
    /// Migration aggregate
    pub meta: MassMigrationMeta,
    /// Root of the withdrawal tree
    pub withdraw_root: Hash,
}

/// Deposit subtree inserted by a commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCommitmentBody {
    /// Subtree ID assigned on chain
    pub subtree_id: U256,
    /// Root of the deposit subtree
    pub subtree_root: Hash,
    /// Deposits of the subtree
    pub deposits: Vec<PendingDeposit>,
}

/// Type-specific part of a commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentBody {
    /// Transfer or create-to-transfer commitment
    Tx(TxCommitmentBody),
    /// Mass migration commitment
    MassMigration(MassMigrationCommitmentBody),
    /// Deposit commitment
    Deposit(DepositCommitmentBody),
}

/// A commitment of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Position of the commitment
    pub id: CommitmentId,
    /// Type of the batch the commitment belongs to
    pub commitment_type: BatchType,
    /// State root after applying the commitment
    pub post_state_root: Hash,
    /// Type-specific fields
    pub body: CommitmentBody,
}

impl Commitment {
    /// Hash of the on-chain commitment body
    pub fn body_hash(&self) -> Result<Hash, StorageError> {
        match &self.body {
            CommitmentBody::Tx(body) => body.body_hash.ok_or(StorageError::MissingBodyHash),
            CommitmentBody::MassMigration(body) => {
                body.tx.body_hash.ok_or(StorageError::MissingBodyHash)
            }
            CommitmentBody::Deposit(body) => Ok(Keccak256Hasher::hash_parts(&[
                body.subtree_id.to_be_bytes::<32>().as_slice(),
                body.subtree_root.as_slice(),
            ])),
        }
    }

    /// Leaf of the commitment in its batch tree
    pub fn leaf_hash(&self) -> Result<Hash, StorageError> {
        Ok(Keccak256Hasher::hash_pair(
            &self.post_state_root,
            &self.body_hash()?,
        ))
    }

    /// Encode the commitment, without its id
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![self.commitment_type as u8];
        buf.extend_from_slice(&self.post_state_root);
        match &self.body {
            CommitmentBody::Tx(body) => body.write(&mut buf),
            CommitmentBody::MassMigration(body) => {
                body.tx.write(&mut buf);
                buf.put_u32(body.meta.spoke_id);
                buf.put_u256(&body.meta.token_id);
                buf.put_u256(&body.meta.amount);
                buf.put_u32(body.meta.fee_receiver);
                buf.extend_from_slice(&body.withdraw_root);
            }
            CommitmentBody::Deposit(body) => {
                buf.put_u256(&body.subtree_id);
                buf.extend_from_slice(&body.subtree_root);
                PendingDeposit::write_all(&body.deposits, &mut buf);
            }
        }
        buf
    }

    /// Decode the commitment stored under `id`.
    ///
    /// # Panics
    ///
    /// If the type tag does not name a commitment type.
    pub fn from_bytes(id: CommitmentId, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "commitment");
        let commitment_type = BatchType::decode(reader.u8()?);
        let post_state_root = reader.hash()?;
        let body = match commitment_type {
            BatchType::Transfer | BatchType::Create2Transfer => {
                CommitmentBody::Tx(TxCommitmentBody::read(&mut reader)?)
            }
            BatchType::MassMigration => {
                CommitmentBody::MassMigration(MassMigrationCommitmentBody {
                    tx: TxCommitmentBody::read(&mut reader)?,
                    meta: MassMigrationMeta {
                        spoke_id: reader.u32()?,
                        token_id: reader.u256()?,
                        amount: reader.u256()?,
                        fee_receiver: reader.u32()?,
                    },
                    withdraw_root: reader.hash()?,
                })
            }
            BatchType::Deposit => CommitmentBody::Deposit(DepositCommitmentBody {
                subtree_id: reader.u256()?,
                subtree_root: reader.hash()?,
                deposits: PendingDeposit::read_all(&mut reader)?,
            }),
            BatchType::Genesis => panic!("genesis batch has no commitments"),
        };
        reader.finish()?;
        Ok(Self {
            id,
            commitment_type,
            post_state_root,
            body,
        })
    }
}
