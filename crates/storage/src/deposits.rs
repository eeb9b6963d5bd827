//! Queues of deposits and deposit subtrees awaiting a commitment

use alloy_primitives::U256;
use commander_db::CursorOptions;

use crate::{
    error::StorageError,
    keys::{
        PENDING_DEPOSIT_PREFIX, PENDING_DEPOSIT_SUBTREE_PREFIX, decode_u256, pending_deposit_key,
        pending_deposit_subtree_key, suffix,
    },
    models::{DepositId, PendingDeposit, PendingDepositSubtree},
    storage::Storage,
};

impl Storage {
    /// Queue a deposit
    pub fn add_pending_deposit(&self, deposit: &PendingDeposit) -> Result<(), StorageError> {
        let key = pending_deposit_key(&deposit.id.subtree_id, &deposit.id.deposit_index);
        self.database.update(|txn| txn.upsert(&key, deposit.to_bytes()))?;
        Ok(())
    }

    /// The `count` oldest queued deposits
    pub fn get_first_pending_deposits(
        &self,
        count: usize,
    ) -> Result<Vec<PendingDeposit>, StorageError> {
        let deposits = self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(PENDING_DEPOSIT_PREFIX))?;
            let mut deposits = Vec::with_capacity(count);
            while deposits.len() < count {
                let Some(value) = cursor.value() else {
                    break;
                };
                deposits.push(PendingDeposit::from_bytes(value)?);
                cursor.next();
            }
            Ok::<_, StorageError>(deposits)
        })?;
        if deposits.len() < count {
            return Err(StorageError::RanOutOfPendingDeposits);
        }
        Ok(deposits)
    }

    /// Drop the given deposits from the queue
    pub fn remove_pending_deposits(&self, ids: &[DepositId]) -> Result<(), StorageError> {
        self.database.update(|txn| {
            for id in ids {
                txn.delete(&pending_deposit_key(&id.subtree_id, &id.deposit_index))?;
            }
            Ok(())
        })
    }

    /// Queue a full deposit subtree
    pub fn add_pending_deposit_subtree(
        &self,
        subtree: &PendingDepositSubtree,
    ) -> Result<(), StorageError> {
        let key = pending_deposit_subtree_key(&subtree.id);
        self.database.update(|txn| txn.upsert(&key, subtree.to_bytes()))?;
        Ok(())
    }

    /// Queued subtree with `id`
    pub fn get_pending_deposit_subtree(
        &self,
        id: U256,
    ) -> Result<PendingDepositSubtree, StorageError> {
        self.database.view(|txn| {
            let bytes = txn
                .get(&pending_deposit_subtree_key(&id))?
                .ok_or(StorageError::NotFound("pending deposit subtree"))?;
            PendingDepositSubtree::from_bytes(id, &bytes)
        })
    }

    /// Queued subtree with the lowest ID
    pub fn get_first_pending_deposit_subtree(&self) -> Result<PendingDepositSubtree, StorageError> {
        self.database.view(|txn| {
            let cursor = txn.cursor(CursorOptions::prefix(PENDING_DEPOSIT_SUBTREE_PREFIX))?;
            match (cursor.key(), cursor.value()) {
                (Some(key), Some(value)) => {
                    let id = decode_u256(suffix(key, PENDING_DEPOSIT_SUBTREE_PREFIX))?;
                    PendingDepositSubtree::from_bytes(id, value)
                }
                _ => Err(StorageError::NotFound("pending deposit subtree")),
            }
        })
    }

    /// Drop the queued subtrees with `ids`.
    ///
    /// Fails with `NotFound`, deleting nothing, if any of them is missing.
    pub fn delete_pending_deposit_subtrees(&self, ids: &[U256]) -> Result<(), StorageError> {
        self.database.update(|txn| {
            for id in ids {
                let key = pending_deposit_subtree_key(id);
                if !txn.exists(&key)? {
                    return Err(StorageError::NotFound("pending deposit subtree"));
                }
                txn.delete(&key)?;
            }
            Ok(())
        })
    }
}
