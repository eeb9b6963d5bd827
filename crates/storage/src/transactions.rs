//! Lifecycle of transactions after they leave the mempool

use alloy_primitives::U256;
use commander_db::{RetryableError, TxOptions};
use commander_smt::Hash;

use crate::{
    error::StorageError,
    keys::{BATCHED_TX_SLOT_INDEX, batched_tx_key, decode_u256, failed_tx_key, pending_tx_key},
    models::{BatchedTx, CommitmentId, CommitmentSlot, FailedTx, PendingTx, StoredTx, TxError},
    storage::Storage,
};

impl Storage {
    /// Move `txs` from the mempool into the commitment `commitment_id`, in
    /// order.
    pub fn mark_transactions_as_included(
        &self,
        txs: &[PendingTx],
        commitment_id: CommitmentId,
    ) -> Result<(), StorageError> {
        self.execute_in_read_write_transaction(|storage| {
            for (index, tx) in txs.iter().enumerate() {
                let batched = BatchedTx {
                    tx: tx.clone(),
                    slot: CommitmentSlot::new(commitment_id, index as u32),
                };
                storage.unsafe_add_batched_tx(&batched)?;
            }
            Ok(())
        })
    }

    fn unsafe_add_batched_tx(&self, batched: &BatchedTx) -> Result<(), StorageError> {
        let tx = &batched.tx;
        let pending_key = pending_tx_key(tx.from_state_id, tx.nonce)?;
        self.database.update(|txn| {
            txn.delete(&pending_key)?;
            txn.upsert(&batched_tx_key(&tx.hash), batched.to_bytes())?;
            txn.index_insert(BATCHED_TX_SLOT_INDEX, &batched.slot.to_bytes(), &tx.hash)
        })?;
        Ok(())
    }

    /// Record the rejected transactions and drop them from the mempool.
    ///
    /// The records may span several database transactions when they do not
    /// fit the write budget of one.
    pub fn set_transaction_errors(&self, errors: &[TxError]) -> Result<(), StorageError> {
        let tx_count = self.update_in_multiple_transactions(
            errors
                .iter()
                .map(|error| move |storage: &Self| storage.unsafe_set_transaction_error(error)),
        )?;
        tracing::debug!(
            target: "storage",
            errors = errors.len(),
            transactions = tx_count,
            "Stored transaction errors"
        );
        Ok(())
    }

    fn unsafe_set_transaction_error(&self, error: &TxError) -> Result<(), StorageError> {
        let tx = &error.tx;
        let failed = FailedTx {
            tx: tx.clone(),
            error_message: error.error_message.clone(),
        };
        let pending_key = pending_tx_key(tx.from_state_id, tx.nonce)?;
        self.database.update(|txn| {
            txn.delete(&pending_key)?;
            txn.upsert(&failed_tx_key(&tx.hash), failed.to_bytes())
        })?;
        Ok(())
    }

    /// Run every operation, committing and opening a new database
    /// transaction whenever the current one runs out of write budget.
    ///
    /// An operation that overflows the budget is rolled back and retried
    /// alone in the fresh transaction. Returns the number of database
    /// transactions used.
    fn update_in_multiple_transactions<F>(
        &self,
        operations: impl IntoIterator<Item = F>,
    ) -> Result<usize, StorageError>
    where
        F: Fn(&Self) -> Result<(), StorageError>,
    {
        let (mut controller, mut tx_storage) = self.begin_transaction(TxOptions::default());
        let mut tx_count = 1;
        for operation in operations {
            let mut result = tx_storage
                .database
                .with_savepoint(|_| operation(&tx_storage));
            if result.as_ref().is_err_and(RetryableError::is_txn_too_big) {
                controller.commit()?;
                (controller, tx_storage) = self.begin_transaction(TxOptions::default());
                tx_count += 1;
                result = tx_storage
                    .database
                    .with_savepoint(|_| operation(&tx_storage));
            }
            if let Err(err) = result {
                tracing::error!(
                    target: "storage",
                    transaction = tx_count,
                    error = %err,
                    "Multi-transaction update failed"
                );
                return Err(err);
            }
        }
        controller.commit()?;
        Ok(tx_count)
    }

    /// Return batched or failed transactions to the mempool
    pub fn mark_transactions_as_pending(&self, hashes: &[Hash]) -> Result<(), StorageError> {
        self.execute_in_read_write_transaction(|storage| {
            for hash in hashes {
                let tx = match storage.find_batched_tx(hash)? {
                    Some(batched) => {
                        storage.delete_batched_tx(&batched)?;
                        batched.tx
                    }
                    None => {
                        let failed = storage
                            .find_failed_tx(hash)?
                            .ok_or(StorageError::NotFound("transaction"))?;
                        storage
                            .database
                            .update(|txn| txn.delete(&failed_tx_key(hash)))?;
                        failed.tx
                    }
                };
                storage.insert_pending_tx_skip_validation(&tx)?;
            }
            Ok(())
        })
    }

    /// Return the transactions of the given batches to the mempool
    pub(crate) fn unbatch_transactions(&self, batch_ids: &[U256]) -> Result<(), StorageError> {
        let hashes = match self.get_transaction_hashes_by_batch_ids(batch_ids) {
            Err(err) if err.is_not_found() => return Ok(()),
            result => result?,
        };
        for hash in &hashes {
            let batched = self
                .find_batched_tx(hash)?
                .ok_or(StorageError::NotFound("batched transaction"))?;
            self.delete_batched_tx(&batched)?;
            self.insert_pending_tx_skip_validation(&batched.tx)?;
        }
        Ok(())
    }

    fn find_batched_tx(&self, hash: &Hash) -> Result<Option<BatchedTx>, StorageError> {
        self.database.view(|txn| {
            txn.get(&batched_tx_key(hash))?
                .map(|bytes| BatchedTx::from_bytes(&bytes))
                .transpose()
        })
    }

    fn find_failed_tx(&self, hash: &Hash) -> Result<Option<FailedTx>, StorageError> {
        self.database.view(|txn| {
            txn.get(&failed_tx_key(hash))?
                .map(|bytes| FailedTx::from_bytes(&bytes))
                .transpose()
        })
    }

    fn delete_batched_tx(&self, batched: &BatchedTx) -> Result<(), StorageError> {
        self.database.update(|txn| {
            txn.delete(&batched_tx_key(&batched.tx.hash))?;
            txn.index_delete(
                BATCHED_TX_SLOT_INDEX,
                &batched.slot.to_bytes(),
                &batched.tx.hash,
            )
        })?;
        Ok(())
    }

    /// Transaction with `hash` in whichever stage it is
    pub fn get_transaction_by_hash(&self, hash: &Hash) -> Result<StoredTx, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            if let Some(batched) = storage.find_batched_tx(hash)? {
                return Ok(StoredTx::Batched(batched));
            }
            if let Some(pending) = storage.get_mempool_transaction_by_hash(hash)? {
                return Ok(StoredTx::Pending(pending));
            }
            storage
                .find_failed_tx(hash)?
                .map(StoredTx::Failed)
                .ok_or(StorageError::NotFound("transaction"))
        })
    }

    /// Hashes of the transactions included in `batch_ids`, by commitment slot
    pub fn get_transaction_hashes_by_batch_ids(
        &self,
        batch_ids: &[U256],
    ) -> Result<Vec<Hash>, StorageError> {
        let hashes = self.database.view(|txn| {
            let mut hashes = Vec::new();
            for batch_id in batch_ids {
                for primary in txn.index_lookup(BATCHED_TX_SLOT_INDEX, &batch_id.to_be_bytes::<32>())? {
                    hashes.push(slot_entry_hash(&primary)?);
                }
            }
            Ok::<_, StorageError>(hashes)
        })?;
        if hashes.is_empty() {
            return Err(StorageError::NotFound("transactions"));
        }
        Ok(hashes)
    }

    /// Number of transactions included in batches up to the latest
    /// submitted one
    pub fn get_transaction_count(&self) -> Result<usize, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            let latest = match storage.get_latest_submitted_batch() {
                Ok(batch) => batch.id,
                Err(err) if err.is_not_found() => return Ok(0),
                Err(err) => return Err(err),
            };
            storage.database.view(|txn| {
                let mut count = 0;
                for entry in txn.index_lookup(BATCHED_TX_SLOT_INDEX, &[])? {
                    let batch_id = entry
                        .get(..32)
                        .ok_or(StorageError::InvalidLength("commitment slot"))?;
                    if decode_u256(batch_id)? <= latest {
                        count += 1;
                    }
                }
                Ok(count)
            })
        })
    }
}

/// Hash at the end of a commitment slot index entry
fn slot_entry_hash(entry: &[u8]) -> Result<Hash, StorageError> {
    entry
        .len()
        .checked_sub(32)
        .and_then(|start| Hash::try_from(&entry[start..]).ok())
        .ok_or(StorageError::InvalidLength("commitment slot"))
}
