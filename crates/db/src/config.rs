//! Store configuration

use serde::{Deserialize, Serialize};
use std::env;

/// Default number of writes a single transaction may buffer.
pub const DEFAULT_MAX_TXN_WRITES: usize = 100_000;

/// Default number of times a top-level transaction is retried on conflict.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 10;

/// Key-value store configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbConfig {
    /// Writes a transaction may buffer before failing with `TxnTooBig`
    pub max_txn_writes: usize,
    /// Retries of `execute_in_transaction` after a commit conflict
    pub max_conflict_retries: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_txn_writes: DEFAULT_MAX_TXN_WRITES,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl DbConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let max_txn_writes = env::var("COMMANDER_DB_MAX_TXN_WRITES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_TXN_WRITES);

        let max_conflict_retries = env::var("COMMANDER_DB_MAX_CONFLICT_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONFLICT_RETRIES);

        Self {
            max_txn_writes,
            max_conflict_retries,
        }
    }

    /// Override the write budget
    pub const fn with_max_txn_writes(mut self, max_txn_writes: usize) -> Self {
        self.max_txn_writes = max_txn_writes;
        self
    }
}
