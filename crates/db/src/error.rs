//! Store errors

use thiserror::Error;

/// Errors returned by the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DbError {
    /// A key in the read set was committed by a concurrent transaction.
    #[error("transaction conflict, please retry")]
    Conflict,
    /// The transaction exceeded its write budget.
    #[error("transaction is too big to fit into a single commit")]
    TxnTooBig,
    /// `insert` was called for a key that is already present.
    #[error("key already exists")]
    KeyExists,
    /// A write was attempted through a read-only transaction.
    #[error("cannot write in a read-only transaction")]
    ReadOnly,
    /// The transaction was already committed or discarded.
    #[error("transaction has already been committed or discarded")]
    Finished,
}
