//! Transactional key-value store backing the commander state.
//!
//! The store keeps every key versioned by commit timestamp, so each
//! transaction reads a stable snapshot taken when it started. Conflicts are
//! detected optimistically: point reads are recorded in the transaction's read
//! set and a commit fails with [`DbError::Conflict`] when any of those keys was
//! committed by somebody else in the meantime.
//!
//! Cursor movement (`seek`, `next`, `valid_for_prefix`, `key`) never touches
//! the read set. Only reading a value through the cursor does. Code that must
//! not conflict with concurrent inserts relies on this: it proves a key exists
//! by scanning instead of probing it with a point read.

mod config;
mod database;
mod error;
mod store;
mod txn;

pub use config::DbConfig;
pub use database::{Database, RetryableError, TxController, TxOptions};
pub use error::DbError;
pub use store::Store;
pub use txn::{CommitHook, Cursor, CursorOptions, Savepoint, Txn};

/// Prefix shared by all secondary index entries.
pub const INDEX_PREFIX: &[u8] = b"_index:";
