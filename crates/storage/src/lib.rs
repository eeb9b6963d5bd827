//! Persisted state of the rollup commander
//!
//! [`Storage`] is the entry point. It owns the [`StateTree`] of user
//! balances, the [`AccountTree`] of registered public keys and the record
//! stores of the mempool, batches, commitments and deposits. Everything is
//! kept in one transactional key-value store, so a [`Storage`] bound to a
//! transaction (see [`Storage::begin_transaction`]) makes every tree and
//! record update part of that transaction.
//!
//! The state tree keeps an update log that lets it go back to any earlier
//! root, which is what [`Storage::revert_batches`] builds on.

mod account_tree;
mod batches;
mod codec;
mod commitments;
mod config;
mod deposits;
mod error;
mod heap;
mod keys;
mod mempool;
mod merkle_tree;
mod models;
mod pending_state;
mod state_tree;
mod storage;
mod transactions;
mod types;

#[cfg(test)]
mod test_utils;

pub use account_tree::{
    ACCOUNT_BATCH_OFFSET, ACCOUNT_BATCH_SIZE, ACCOUNT_TREE_NAMESPACE, AccountTree,
    LEFT_SUBTREE_MAX_VALUE, RIGHT_SUBTREE_MAX_VALUE,
};
pub use config::Config;
pub use error::StorageError;
pub use heap::MempoolHeap;
pub use merkle_tree::StoredMerkleTree;
pub use models::*;
pub use pending_state::{
    PENDING_PUB_KEY_ID, PendingState, PendingUserState, PubkeyBalance, RecomputedPendingState,
};
pub use state_tree::{STATE_TREE_NAMESPACE, StateMerkleProof, StateTree};
pub use storage::Storage;
pub use types::*;
