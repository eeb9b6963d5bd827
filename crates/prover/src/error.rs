//! Prover errors

use commander_db::{DbError, RetryableError};
use commander_smt::MerkleError;
use commander_storage::StorageError;
use thiserror::Error;

/// Errors returned while building proofs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProverError {
    /// Reading the state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Building a Merkle tree or path failed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The commitment index is neither `-1` nor a position in the batch.
    #[error("commitment index {index} out of range for {len} commitments")]
    CommitmentIndexOutOfRange {
        /// Requested index
        index: i64,
        /// Number of commitments in the batch
        len: usize,
    },
    /// Every state proof needs exactly one receiver.
    #[error("expected {expected} receivers, got {actual}")]
    ReceiverCountMismatch {
        /// Number of state proofs
        expected: usize,
        /// Number of receivers in the commitment
        actual: usize,
    },
    /// The commitment's transaction bytes are not a whole number of
    /// transactions.
    #[error("invalid length {0} of commitment transactions")]
    InvalidTransactionsLength(usize),
}

impl ProverError {
    /// Whether a requested entity is missing from storage
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_not_found())
    }
}

impl From<DbError> for ProverError {
    fn from(err: DbError) -> Self {
        Self::Storage(err.into())
    }
}

impl RetryableError for ProverError {
    fn db_error(&self) -> Option<DbError> {
        match self {
            Self::Storage(err) => err.db_error(),
            _ => None,
        }
    }
}
