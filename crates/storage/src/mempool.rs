//! Mempool admission and queries

use alloy_primitives::U256;
use commander_db::{CursorOptions, DbError, TxOptions};
use commander_smt::Hash;

use crate::{
    error::StorageError,
    keys::{PENDING_TX_PREFIX, pending_tx_account_prefix, pending_tx_key},
    models::PendingTx,
    pending_state::{PendingState, receiver_credit, receiver_pubkey_credit},
    storage::Storage,
    types::TxType,
};

impl Storage {
    /// Admit `tx` to the mempool.
    ///
    /// The nonce must be the sender's pending nonce and the pending balance
    /// must cover amount plus fee. The sender's pending state advances, a
    /// transfer receiver is credited and so is the public key a
    /// Create2Transfer pays to. Fee receivers are only credited once the
    /// transaction lands in a commitment.
    pub fn add_mempool_tx(&self, tx: &PendingTx) -> Result<(), StorageError> {
        self.execute_in_read_write_transaction(|storage| storage.unsafe_add_mempool_tx(tx))
    }

    fn unsafe_add_mempool_tx(&self, tx: &PendingTx) -> Result<(), StorageError> {
        let sender = self.get_pending_state(tx.from_state_id)?;
        if tx.nonce != sender.nonce {
            return Err(StorageError::InvalidNonce {
                expected: sender.nonce,
                actual: tx.nonce,
            });
        }
        let total = tx.total()?;
        if sender.balance < total {
            return Err(StorageError::BalanceTooLow);
        }

        self.set_pending_state(
            tx.from_state_id,
            PendingState {
                nonce: sender.nonce + U256::from(1),
                balance: sender.balance - total,
            },
        )?;
        if let Some((receiver, amount)) = receiver_credit(tx)? {
            self.add_to_pending_balance(receiver, amount)?;
        }
        if let Some((public_key, amount)) = receiver_pubkey_credit(tx)? {
            self.add_to_pending_pubkey_balance(&public_key, amount)?;
        }

        let key = pending_tx_key(tx.from_state_id, tx.nonce)?;
        self.database.update(|txn| {
            txn.insert(&key, tx.to_bytes()).map_err(|err| match err {
                DbError::KeyExists => StorageError::CannotReplaceTransaction,
                err => err.into(),
            })
        })
    }

    /// Put `tx` back into the mempool without touching pending state
    pub fn insert_pending_tx_skip_validation(&self, tx: &PendingTx) -> Result<(), StorageError> {
        let key = pending_tx_key(tx.from_state_id, tx.nonce)?;
        self.database.update(|txn| txn.upsert(&key, tx.to_bytes()))?;
        Ok(())
    }

    /// Every pending transaction, by sender and nonce
    pub fn get_all_mempool_transactions(&self) -> Result<Vec<PendingTx>, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(PENDING_TX_PREFIX))?;
            let mut txs = Vec::new();
            while let Some(value) = cursor.value() {
                txs.push(PendingTx::from_bytes(value)?);
                cursor.next();
            }
            Ok(txs)
        })
    }

    /// Pending transaction with `hash`, if any
    pub fn get_mempool_transaction_by_hash(
        &self,
        hash: &Hash,
    ) -> Result<Option<PendingTx>, StorageError> {
        Ok(self
            .get_all_mempool_transactions()?
            .into_iter()
            .find(|tx| tx.hash == *hash))
    }

    /// Number of pending transactions of `tx_type`
    pub fn count_pending_txs_of_type(&self, tx_type: TxType) -> Result<usize, StorageError> {
        Ok(self
            .get_all_mempool_transactions()?
            .iter()
            .filter(|tx| tx.tx_type() == tx_type)
            .count())
    }

    /// The executable transaction of `tx_type` that has waited the longest.
    /// Transactions without a receive time are never picked.
    pub fn find_oldest_mempool_transaction(
        &self,
        tx_type: TxType,
    ) -> Result<Option<PendingTx>, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            let mut oldest: Option<PendingTx> = None;
            for tx in storage.lowest_nonce_pending_txs()? {
                if !storage.tx_is_executable(tx_type, &tx)? {
                    continue;
                }
                let Some(received) = tx.receive_time else {
                    continue;
                };
                if oldest
                    .as_ref()
                    .and_then(|oldest| oldest.receive_time)
                    .is_none_or(|oldest| received < oldest)
                {
                    oldest = Some(tx);
                }
            }
            Ok(oldest)
        })
    }

    /// The lowest-nonce pending transaction of every sender.
    ///
    /// The cursor jumps from one sender's prefix to the next, reading only
    /// the head of each.
    pub(crate) fn lowest_nonce_pending_txs(&self) -> Result<Vec<PendingTx>, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(PENDING_TX_PREFIX))?;
            let mut heads = Vec::new();
            while let Some(value) = cursor.value() {
                let tx = PendingTx::from_bytes(value)?;
                let next_sender = tx.from_state_id.checked_add(1);
                heads.push(tx);
                match next_sender {
                    Some(state_id) => cursor.seek(&pending_tx_account_prefix(state_id)),
                    None => break,
                }
            }
            Ok(heads)
        })
    }

    /// Whether `tx` can be applied on top of the persisted state right now
    pub(crate) fn tx_is_executable(
        &self,
        tx_type: TxType,
        tx: &PendingTx,
    ) -> Result<bool, StorageError> {
        if tx.tx_type() != tx_type {
            return Ok(false);
        }
        let sender = self.state_tree.leaf_or_empty(tx.from_state_id)?.user_state;
        if sender.nonce != tx.nonce {
            tracing::error!(
                target: "mempool",
                state_id = tx.from_state_id,
                tx_nonce = %tx.nonce,
                state_nonce = %sender.nonce,
                "Lowest pending nonce does not match the state nonce"
            );
            return Ok(false);
        }
        Ok(sender.balance >= tx.total()?)
    }
}
