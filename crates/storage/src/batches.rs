//! Batch records and reverting submitted batches

use alloy_primitives::U256;
use commander_db::{CursorOptions, DbError, Txn};
use commander_smt::Hash;

use crate::{
    error::StorageError,
    keys::{BATCH_HASH_INDEX, BATCH_PREFIX, batch_key, decode_u256, suffix},
    models::{Batch, CommitmentBody, CommitmentId, PendingDepositSubtree},
    storage::Storage,
    types::BatchType,
};

impl Storage {
    /// Store a new batch and index its hash
    pub fn add_batch(&self, batch: &Batch) -> Result<(), StorageError> {
        self.database
            .update(|txn| {
                txn.insert(&batch_key(&batch.id), batch.to_bytes())?;
                if let Some(hash) = &batch.hash {
                    txn.index_insert(BATCH_HASH_INDEX, hash, &batch.id.to_be_bytes::<32>())?;
                }
                Ok(())
            })
            .map_err(|err| match err {
                DbError::KeyExists => StorageError::AlreadyExists("batch"),
                err => err.into(),
            })
    }

    /// Overwrite a stored batch, moving its hash index entry along
    pub fn update_batch(&self, batch: &Batch) -> Result<(), StorageError> {
        self.database.update(|txn| {
            let old = read_batch(txn, batch.id)?.ok_or(StorageError::NotFound("batch"))?;
            let id = batch.id.to_be_bytes::<32>();
            if old.hash != batch.hash {
                if let Some(hash) = &old.hash {
                    txn.index_delete(BATCH_HASH_INDEX, hash, &id)?;
                }
                if let Some(hash) = &batch.hash {
                    txn.index_insert(BATCH_HASH_INDEX, hash, &id)?;
                }
            }
            txn.upsert(&batch_key(&batch.id), batch.to_bytes())?;
            Ok(())
        })
    }

    /// Batch stored under `id`
    pub fn get_batch(&self, id: U256) -> Result<Batch, StorageError> {
        self.database
            .view(|txn| read_batch(txn, id))?
            .ok_or(StorageError::NotFound("batch"))
    }

    /// Batch with the on-chain `hash`
    pub fn get_batch_by_hash(&self, hash: &Hash) -> Result<Batch, StorageError> {
        self.database.view(|txn| {
            let id = match txn.index_lookup(BATCH_HASH_INDEX, hash)?.first() {
                Some(id) => decode_u256(id)?,
                None => return Err(StorageError::NotFound("batch")),
            };
            read_batch(txn, id)?.ok_or(StorageError::NotFound("batch"))
        })
    }

    /// Newest batch whose submission has been mined
    pub fn get_latest_submitted_batch(&self) -> Result<Batch, StorageError> {
        self.find_latest_batch(|batch| batch.hash.is_some())
    }

    /// Newest batch finalised at `current_block`
    pub fn get_latest_finalised_batch(&self, current_block: u32) -> Result<Batch, StorageError> {
        self.find_latest_batch(|batch| {
            batch
                .finalisation_block
                .is_some_and(|block| block <= current_block)
        })
    }

    fn find_latest_batch(&self, matches: impl Fn(&Batch) -> bool) -> Result<Batch, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(BATCH_PREFIX).reverse())?;
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                let batch = Batch::from_bytes(batch_id(key)?, value)?;
                if matches(&batch) {
                    return Ok(batch);
                }
                cursor.next();
            }
            Err(StorageError::NotFound("batch"))
        })
    }

    /// Batches with IDs in `from..=to`. A missing bound leaves that side
    /// open.
    pub fn get_batches_in_range(
        &self,
        from: Option<U256>,
        to: Option<U256>,
    ) -> Result<Vec<Batch>, StorageError> {
        let batches = self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(BATCH_PREFIX))?;
            if let Some(from) = &from {
                cursor.seek(&batch_key(from));
            }
            let mut batches = Vec::new();
            while let Some(key) = cursor.key() {
                let id = batch_id(key)?;
                if to.is_some_and(|to| id > to) {
                    break;
                }
                if let Some(value) = cursor.value() {
                    batches.push(Batch::from_bytes(id, value)?);
                }
                cursor.next();
            }
            Ok::<_, StorageError>(batches)
        })?;
        if batches.is_empty() {
            return Err(StorageError::NotFound("batches"));
        }
        Ok(batches)
    }

    /// ID the next created batch gets
    pub fn get_next_batch_id(&self) -> Result<U256, StorageError> {
        self.database.view(|txn| {
            let cursor = txn.cursor(CursorOptions::prefix(BATCH_PREFIX).reverse())?;
            cursor.touch();
            match cursor.key() {
                Some(key) => Ok(batch_id(key)? + U256::from(1)),
                None => Ok(U256::from(1)),
            }
        })
    }

    /// Delete the batches with `ids` and their hash index entries.
    ///
    /// Fails with `NotFound`, deleting nothing, if any batch is missing.
    pub fn delete_batches(&self, ids: &[U256]) -> Result<(), StorageError> {
        self.database.update(|txn| {
            let mut batches = Vec::with_capacity(ids.len());
            for id in ids {
                batches.push(read_batch(txn, *id)?.ok_or(StorageError::NotFound("batch"))?);
            }
            for batch in &batches {
                txn.delete(&batch_key(&batch.id))?;
                if let Some(hash) = &batch.hash {
                    txn.index_delete(BATCH_HASH_INDEX, hash, &batch.id.to_be_bytes::<32>())?;
                }
            }
            Ok(())
        })
    }

    /// Undo `start` and every later batch.
    ///
    /// The state tree goes back to the state root `start` was applied on,
    /// deposit subtrees are queued again and batched transactions return to
    /// the mempool. Everything happens in one transaction.
    pub fn revert_batches(&self, start: &Batch) -> Result<(), StorageError> {
        let prev_state_root = start.prev_state_root.ok_or(StorageError::MissingPrevStateRoot)?;
        self.execute_in_read_write_transaction(|storage| {
            tracing::info!(
                target: "storage",
                batch_id = %start.id,
                root = %hex::encode(prev_state_root),
                "Reverting batches"
            );
            storage.state_tree.revert_to(prev_state_root)?;

            let batches = storage.get_batches_in_range(Some(start.id), None)?;
            let mut tx_batch_ids = Vec::new();
            let mut commitment_batch_ids = Vec::new();
            for batch in &batches {
                match batch.batch_type {
                    BatchType::Genesis => continue,
                    BatchType::Deposit => storage.requeue_deposit_subtree(batch.id)?,
                    _ => tx_batch_ids.push(batch.id),
                }
                commitment_batch_ids.push(batch.id);
            }
            storage.unbatch_transactions(&tx_batch_ids)?;
            if !commitment_batch_ids.is_empty() {
                storage.delete_commitments_by_batch_ids(&commitment_batch_ids)?;
            }

            let ids: Vec<U256> = batches.iter().map(|batch| batch.id).collect();
            storage.delete_batches(&ids)?;
            tracing::info!(
                target: "storage",
                batches = ids.len(),
                tx_batches = tx_batch_ids.len(),
                "Reverted batches"
            );
            Ok(())
        })
    }

    /// Put the subtree inserted by deposit batch `batch_id` back in the queue
    fn requeue_deposit_subtree(&self, batch_id: U256) -> Result<(), StorageError> {
        let commitment = self.get_commitment(CommitmentId {
            batch_id,
            index_in_batch: 0,
        })?;
        let CommitmentBody::Deposit(body) = commitment.body else {
            return Err(StorageError::NotFound("deposit commitment"));
        };
        self.add_pending_deposit_subtree(&PendingDepositSubtree {
            id: body.subtree_id,
            root: body.subtree_root,
            deposits: body.deposits,
        })
    }
}

fn read_batch(txn: &Txn, id: U256) -> Result<Option<Batch>, StorageError> {
    txn.get(&batch_key(&id))?
        .map(|bytes| Batch::from_bytes(id, &bytes))
        .transpose()
}

fn batch_id(key: &[u8]) -> Result<U256, StorageError> {
    decode_u256(suffix(key, BATCH_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        models::{
            Commitment, DepositCommitmentBody, DepositId, PendingDeposit, PendingTx, StoredTx,
            TxCommitmentBody,
        },
        test_utils::{storage_with_balances, transfer, user_state},
        types::Signature,
    };

    fn batch(id: u64, batch_type: BatchType) -> Batch {
        Batch {
            id: U256::from(id),
            batch_type,
            transaction_hash: [id as u8; 32],
            hash: None,
            finalisation_block: None,
            account_tree_root: None,
            prev_state_root: None,
            mined_time: None,
        }
    }

    fn submitted(id: u64, finalisation_block: u32) -> Batch {
        Batch {
            hash: Some([0x10 + id as u8; 32]),
            finalisation_block: Some(finalisation_block),
            ..batch(id, BatchType::Transfer)
        }
    }

    #[test]
    fn test_add_get_and_update_batch() {
        let storage = Storage::new(&Config::default()).unwrap();
        let mut stored = batch(1, BatchType::Transfer);
        storage.add_batch(&stored).unwrap();
        assert_eq!(storage.get_batch(U256::from(1)).unwrap(), stored);
        assert_eq!(storage.add_batch(&stored), Err(StorageError::AlreadyExists("batch")));
        assert!(storage.get_batch_by_hash(&[1u8; 32]).unwrap_err().is_not_found());

        stored.hash = Some([1u8; 32]);
        storage.update_batch(&stored).unwrap();
        assert_eq!(storage.get_batch_by_hash(&[1u8; 32]).unwrap(), stored);

        stored.hash = Some([2u8; 32]);
        storage.update_batch(&stored).unwrap();
        assert!(storage.get_batch_by_hash(&[1u8; 32]).unwrap_err().is_not_found());
        assert_eq!(storage.get_batch_by_hash(&[2u8; 32]).unwrap(), stored);

        assert!(storage
            .update_batch(&batch(9, BatchType::Transfer))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_latest_submitted_and_finalised() {
        let storage = Storage::new(&Config::default()).unwrap();
        assert!(storage.get_latest_submitted_batch().unwrap_err().is_not_found());

        storage.add_batch(&submitted(1, 100)).unwrap();
        storage.add_batch(&submitted(2, 200)).unwrap();
        storage.add_batch(&batch(3, BatchType::Transfer)).unwrap();

        assert_eq!(storage.get_latest_submitted_batch().unwrap().id, U256::from(2));
        assert_eq!(storage.get_latest_finalised_batch(150).unwrap().id, U256::from(1));
        assert_eq!(storage.get_latest_finalised_batch(200).unwrap().id, U256::from(2));
        assert!(storage.get_latest_finalised_batch(99).unwrap_err().is_not_found());
    }

    #[test]
    fn test_batches_in_range() {
        let storage = Storage::new(&Config::default()).unwrap();
        for id in 0..5 {
            storage.add_batch(&batch(id, BatchType::Transfer)).unwrap();
        }
        let ids = |from: Option<u64>, to: Option<u64>| -> Vec<U256> {
            storage
                .get_batches_in_range(from.map(U256::from), to.map(U256::from))
                .unwrap()
                .into_iter()
                .map(|batch| batch.id)
                .collect()
        };
        assert_eq!(ids(Some(1), Some(3)), [1, 2, 3].map(U256::from));
        assert_eq!(ids(Some(3), None), [3, 4].map(U256::from));
        assert_eq!(ids(None, Some(0)), [U256::ZERO]);
        assert!(storage
            .get_batches_in_range(Some(U256::from(5)), None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_next_batch_id() {
        let storage = Storage::new(&Config::default()).unwrap();
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(1));
        storage.add_batch(&batch(0, BatchType::Genesis)).unwrap();
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(1));
        storage.add_batch(&batch(1, BatchType::Transfer)).unwrap();
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(2));
    }

    #[test]
    fn test_delete_batches() {
        let storage = Storage::new(&Config::default()).unwrap();
        storage.add_batch(&submitted(1, 10)).unwrap();
        storage.add_batch(&submitted(2, 20)).unwrap();

        assert!(storage
            .delete_batches(&[U256::from(1), U256::from(3)])
            .unwrap_err()
            .is_not_found());
        assert!(storage.get_batch(U256::from(1)).is_ok());

        storage.delete_batches(&[U256::from(1)]).unwrap();
        assert!(storage.get_batch(U256::from(1)).unwrap_err().is_not_found());
        assert!(storage
            .get_batch_by_hash(&submitted(1, 10).hash.unwrap())
            .unwrap_err()
            .is_not_found());
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(3));
    }

    fn tx_commitment(batch_id: u64, post_state_root: Hash) -> Commitment {
        Commitment {
            id: CommitmentId {
                batch_id: U256::from(batch_id),
                index_in_batch: 0,
            },
            commitment_type: BatchType::Transfer,
            post_state_root,
            body: CommitmentBody::Tx(TxCommitmentBody {
                fee_receiver: 0,
                combined_signature: Signature::default(),
                body_hash: None,
            }),
        }
    }

    /// Batch 1 holds two transfers, batch 2 a deposit subtree
    fn storage_with_two_batches() -> (Storage, Hash, Vec<PendingTx>, PendingDepositSubtree) {
        let storage = storage_with_balances(&[(0, 100), (1, 100)]);
        let genesis_root = storage.state_tree.root().unwrap();
        storage
            .add_batch(&Batch {
                prev_state_root: Some(genesis_root),
                ..batch(0, BatchType::Genesis)
            })
            .unwrap();

        let txs = vec![transfer(0, 1, 0, 10, 1), transfer(1, 0, 0, 5, 1)];
        for tx in &txs {
            storage.add_mempool_tx(tx).unwrap();
        }
        let batch_one_root = storage.state_tree.root().unwrap();
        storage.state_tree.set(0, &user_state(0, 94, 1)).unwrap();
        storage.state_tree.set(1, &user_state(1, 106, 1)).unwrap();
        let commitment_id = CommitmentId {
            batch_id: U256::from(1),
            index_in_batch: 0,
        };
        storage.mark_transactions_as_included(&txs, commitment_id).unwrap();
        storage
            .add_commitment(&tx_commitment(1, storage.state_tree.root().unwrap()))
            .unwrap();
        storage
            .add_batch(&Batch {
                prev_state_root: Some(batch_one_root),
                ..submitted(1, 10)
            })
            .unwrap();

        let subtree = PendingDepositSubtree {
            id: U256::from(7),
            root: [0xde; 32],
            deposits: vec![PendingDeposit {
                id: DepositId {
                    subtree_id: U256::from(7),
                    deposit_index: U256::ZERO,
                },
                to_pub_key_id: 2,
                token_id: U256::ZERO,
                l2_amount: U256::from(50),
            }],
        };
        let batch_two_root = storage.state_tree.root().unwrap();
        storage.state_tree.set(2, &user_state(2, 50, 0)).unwrap();
        storage
            .add_commitment(&Commitment {
                id: CommitmentId {
                    batch_id: U256::from(2),
                    index_in_batch: 0,
                },
                commitment_type: BatchType::Deposit,
                post_state_root: storage.state_tree.root().unwrap(),
                body: CommitmentBody::Deposit(DepositCommitmentBody {
                    subtree_id: subtree.id,
                    subtree_root: subtree.root,
                    deposits: subtree.deposits.clone(),
                }),
            })
            .unwrap();
        storage
            .add_batch(&Batch {
                prev_state_root: Some(batch_two_root),
                ..batch(2, BatchType::Deposit)
            })
            .unwrap();

        (storage, batch_one_root, txs, subtree)
    }

    #[test]
    fn test_revert_batches() {
        let (storage, batch_one_root, txs, subtree) = storage_with_two_batches();
        let start = storage.get_batch(U256::from(1)).unwrap();

        storage.revert_batches(&start).unwrap();

        assert_eq!(storage.state_tree.root().unwrap(), batch_one_root);
        assert!(storage.state_tree.leaf(2).unwrap_err().is_not_found());
        for tx in &txs {
            assert_eq!(
                storage.get_transaction_by_hash(&tx.hash).unwrap(),
                StoredTx::Pending(tx.clone())
            );
        }
        assert_eq!(storage.get_pending_deposit_subtree(subtree.id).unwrap(), subtree);
        assert!(storage.get_latest_commitment().unwrap_err().is_not_found());
        assert_eq!(
            storage.get_batches_in_range(None, None).unwrap(),
            vec![storage.get_batch(U256::ZERO).unwrap()]
        );
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(1));
    }

    #[test]
    fn test_revert_only_deposit_batch() {
        let (storage, _, txs, subtree) = storage_with_two_batches();
        let start = storage.get_batch(U256::from(2)).unwrap();

        storage.revert_batches(&start).unwrap();

        assert_eq!(storage.state_tree.root().unwrap(), start.prev_state_root.unwrap());
        assert_eq!(storage.get_pending_deposit_subtree(subtree.id).unwrap(), subtree);
        assert!(matches!(
            storage.get_transaction_by_hash(&txs[0].hash).unwrap(),
            StoredTx::Batched(_)
        ));
        assert_eq!(storage.get_next_batch_id().unwrap(), U256::from(2));
    }

    #[test]
    fn test_revert_without_prev_state_root() {
        let (storage, ..) = storage_with_two_batches();
        let root = storage.state_tree.root().unwrap();
        assert_eq!(
            storage.revert_batches(&batch(1, BatchType::Transfer)),
            Err(StorageError::MissingPrevStateRoot)
        );
        assert_eq!(storage.state_tree.root().unwrap(), root);
    }
}
