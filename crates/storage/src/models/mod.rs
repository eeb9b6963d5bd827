//! Records of the transaction, commitment and batch history

mod batch;
mod commitment;
mod deposit;
mod tx;

pub use batch::Batch;
pub use commitment::{
    Commitment, CommitmentBody, CommitmentId, DepositCommitmentBody, MassMigrationCommitmentBody,
    MassMigrationMeta, TxCommitmentBody,
};
pub use deposit::{DepositId, PendingDeposit, PendingDepositSubtree};
pub use tx::{BatchedTx, CommitmentSlot, FailedTx, PendingTx, StoredTx, TxBody, TxError};
