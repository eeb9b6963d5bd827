//! Storage errors

use alloy_primitives::U256;
use commander_db::{DbError, RetryableError};
use commander_smt::MerkleError;
use thiserror::Error;

/// Errors returned by the commander storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The entity is already stored.
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    /// Error from the underlying key-value store.
    #[error(transparent)]
    Db(#[from] DbError),
    /// Invalid Merkle path arithmetic.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// A stored record could not be decoded.
    #[error("invalid length of encoded {0}")]
    InvalidLength(&'static str),
    /// The public key ID lies outside the range allowed for the operation.
    #[error("invalid public key id {0}")]
    InvalidPubKeyId(u32),
    /// An account with this public key ID is already registered.
    #[error("account with public key id {0} already exists")]
    AccountAlreadyExists(u32),
    /// Some accounts of a batch registration are already registered.
    #[error("accounts with public key ids {0:?} already exist")]
    AccountBatchAlreadyExists(Vec<u32>),
    /// A batch registration must contain exactly one batch of accounts.
    #[error("invalid accounts length: expected {expected}, got {actual}")]
    InvalidAccountsLength {
        /// Required number of accounts
        expected: usize,
        /// Number of accounts supplied
        actual: usize,
    },
    /// No batch of public key IDs is left in the batch range.
    #[error("batch account range is full")]
    BatchAccountRangeFull,
    /// The transaction nonce does not follow the pending nonce.
    #[error("expected nonce {expected}, received nonce {actual}")]
    InvalidNonce {
        /// Pending nonce of the sender
        expected: U256,
        /// Nonce of the transaction
        actual: U256,
    },
    /// The nonce does not fit the pending transaction key.
    #[error("nonce {0} is too large")]
    NonceTooLarge(U256),
    /// The sender cannot pay for amount and fee.
    #[error("balance too low")]
    BalanceTooLow,
    /// Amount and fee overflow a 256-bit balance.
    #[error("balance overflow")]
    BalanceOverflow,
    /// A transaction with this sender and nonce is already pending.
    #[error("cannot replace transactions")]
    CannotReplaceTransaction,
    /// The state tree never had the requested root.
    #[error("cannot revert to not existent state")]
    NonexistentState,
    /// No aligned vacant subtree of the given depth exists.
    #[error("no vacant subtree of depth {0}")]
    NoVacantSubtree(u8),
    /// The commitment has no body hash yet.
    #[error("commitment body hash is missing")]
    MissingBodyHash,
    /// The batch to revert to has no previous state root.
    #[error("batch is missing its previous state root")]
    MissingPrevStateRoot,
    /// Fewer pending deposits are queued than requested.
    #[error("ran out of pending deposits")]
    RanOutOfPendingDeposits,
}

impl StorageError {
    /// Whether the error reports a missing entity
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl RetryableError for StorageError {
    fn db_error(&self) -> Option<DbError> {
        match self {
            Self::Db(err) => Some(*err),
            _ => None,
        }
    }
}
