//! Commitment records, keyed by batch and position in the batch

use alloy_primitives::U256;
use commander_db::{CursorOptions, DbError, Txn};

use crate::{
    error::StorageError,
    keys::{COMMITMENT_PREFIX, commitment_batch_prefix, commitment_key, decode_u256, suffix},
    models::{Commitment, CommitmentId},
    storage::Storage,
};

impl Storage {
    /// Store a new commitment
    pub fn add_commitment(&self, commitment: &Commitment) -> Result<(), StorageError> {
        let key = commitment_key(&commitment.id.batch_id, commitment.id.index_in_batch);
        self.database
            .update(|txn| txn.insert(&key, commitment.to_bytes()))
            .map_err(|err| match err {
                DbError::KeyExists => StorageError::AlreadyExists("commitment"),
                err => err.into(),
            })
    }

    /// Commitment stored under `id`
    pub fn get_commitment(&self, id: CommitmentId) -> Result<Commitment, StorageError> {
        self.database.view(|txn| {
            let bytes = txn
                .get(&commitment_key(&id.batch_id, id.index_in_batch))?
                .ok_or(StorageError::NotFound("commitment"))?;
            Commitment::from_bytes(id, &bytes)
        })
    }

    /// Commitments of `batch_id`, by position
    pub fn get_commitments_by_batch_id(
        &self,
        batch_id: U256,
    ) -> Result<Vec<Commitment>, StorageError> {
        let commitments = self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(&commitment_batch_prefix(&batch_id)))?;
            let mut commitments = Vec::new();
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                commitments.push(Commitment::from_bytes(commitment_id(key)?, value)?);
                cursor.next();
            }
            Ok::<_, StorageError>(commitments)
        })?;
        if commitments.is_empty() {
            return Err(StorageError::NotFound("commitments"));
        }
        Ok(commitments)
    }

    /// Commitment with the highest batch ID and position
    pub fn get_latest_commitment(&self) -> Result<Commitment, StorageError> {
        self.database.view(|txn| {
            let cursor = txn.cursor(CursorOptions::prefix(COMMITMENT_PREFIX).reverse())?;
            match (cursor.key(), cursor.value()) {
                (Some(key), Some(value)) => Commitment::from_bytes(commitment_id(key)?, value),
                _ => Err(StorageError::NotFound("commitment")),
            }
        })
    }

    /// Delete every commitment of `batch_ids`.
    ///
    /// Fails with `NotFound` when none of the batches has a commitment.
    pub fn delete_commitments_by_batch_ids(&self, batch_ids: &[U256]) -> Result<(), StorageError> {
        self.database.update(|txn| {
            let mut deleted = 0;
            for batch_id in batch_ids {
                let keys = batch_commitment_keys(txn, batch_id)?;
                for key in &keys {
                    txn.delete(key)?;
                }
                deleted += keys.len();
            }
            if deleted == 0 {
                return Err(StorageError::NotFound("commitments"));
            }
            Ok(())
        })
    }
}

fn batch_commitment_keys(txn: &Txn, batch_id: &U256) -> Result<Vec<Vec<u8>>, DbError> {
    let mut cursor = txn.cursor(CursorOptions::prefix(&commitment_batch_prefix(batch_id)))?;
    let mut keys = Vec::new();
    while let Some(key) = cursor.key() {
        cursor.touch();
        keys.push(key.to_vec());
        cursor.next();
    }
    Ok(keys)
}

fn commitment_id(key: &[u8]) -> Result<CommitmentId, StorageError> {
    match suffix(key, COMMITMENT_PREFIX) {
        [batch_id @ .., index_in_batch] => Ok(CommitmentId {
            batch_id: decode_u256(batch_id)?,
            index_in_batch: *index_in_batch,
        }),
        [] => Err(StorageError::InvalidLength("key")),
    }
}
