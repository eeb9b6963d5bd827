//! Inclusion proofs of commitments in their batch

use alloy_primitives::U256;
use commander_smt::{Hash, MerklePath, MerkleTree, zero_hash};
use commander_storage::{Commitment, Storage, StorageError};

use crate::{error::ProverError, proofs::CommitmentInclusionProof, prover::Prover};

impl Prover {
    /// Inclusion proof of the commitment preceding a disputed one.
    ///
    /// `commitments` are the commitments of batch `batch_id`. An index of
    /// `-1` means the predecessor is the last commitment of the previous
    /// batch.
    pub fn previous_commitment_inclusion_proof(
        &self,
        batch_id: U256,
        commitments: &[Commitment],
        previous_commitment_index: i64,
    ) -> Result<CommitmentInclusionProof, ProverError> {
        if previous_commitment_index == -1 {
            return self.previous_batch_commitment_inclusion_proof(batch_id);
        }
        let out_of_range = ProverError::CommitmentIndexOutOfRange {
            index: previous_commitment_index,
            len: commitments.len(),
        };
        let index = usize::try_from(previous_commitment_index).map_err(|_| out_of_range.clone())?;
        let previous = commitments.get(index).ok_or(out_of_range)?;

        let leaf_hashes = commitments
            .iter()
            .map(Commitment::leaf_hash)
            .collect::<Result<Vec<_>, _>>()?;
        create_commitment_inclusion_proof(
            &leaf_hashes,
            index as u32,
            previous.post_state_root,
            previous.body_hash()?,
        )
    }

    /// Inclusion proof of the last commitment of the batch before
    /// `current_batch_id`.
    ///
    /// Batch 1 follows the genesis batch, which has no commitments: its
    /// proof is a single-leaf tree over the genesis state root.
    pub fn previous_batch_commitment_inclusion_proof(
        &self,
        current_batch_id: U256,
    ) -> Result<CommitmentInclusionProof, ProverError> {
        let previous_batch_id = current_batch_id
            .checked_sub(U256::from(1))
            .ok_or(StorageError::NotFound("batch"))?;
        self.read_snapshot(|storage| {
            if previous_batch_id.is_zero() {
                return genesis_batch_commitment_inclusion_proof(storage);
            }
            let previous_batch = storage.get_batch(previous_batch_id)?;
            let commitments = storage.get_commitments_by_batch_id(previous_batch.id)?;
            let Some(last) = commitments.last() else {
                return Err(StorageError::NotFound("commitments").into());
            };
            let leaf_hashes = commitments
                .iter()
                .map(Commitment::leaf_hash)
                .collect::<Result<Vec<_>, _>>()?;
            create_commitment_inclusion_proof(
                &leaf_hashes,
                (commitments.len() - 1) as u32,
                last.post_state_root,
                last.body_hash()?,
            )
        })
    }
}

fn genesis_batch_commitment_inclusion_proof(
    storage: &Storage,
) -> Result<CommitmentInclusionProof, ProverError> {
    let genesis = storage.get_batch(U256::ZERO)?;
    let state_root = genesis
        .prev_state_root
        .ok_or(StorageError::MissingPrevStateRoot)?;
    create_commitment_inclusion_proof(&[state_root], 0, state_root, zero_hash(0))
}

/// Proof that the commitment `(state_root, body_root)` is leaf
/// `commitment_index` of the tree over `leaf_hashes`
pub fn create_commitment_inclusion_proof(
    leaf_hashes: &[Hash],
    commitment_index: u32,
    state_root: Hash,
    body_root: Hash,
) -> Result<CommitmentInclusionProof, ProverError> {
    let tree = MerkleTree::new(leaf_hashes)?;
    Ok(CommitmentInclusionProof {
        state_root,
        body_root,
        path: MerklePath::new(commitment_index, tree.depth())?,
        witness: tree.witness(commitment_index)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use commander_storage::{
        Batch, BatchType, CommitmentBody, CommitmentId, Config, Signature, TxCommitmentBody,
    };

    fn commitment(batch_id: u64, index_in_batch: u8) -> Commitment {
        Commitment {
            id: CommitmentId {
                batch_id: U256::from(batch_id),
                index_in_batch,
            },
            commitment_type: BatchType::Transfer,
            post_state_root: [0x10 + index_in_batch; 32],
            body: CommitmentBody::Tx(TxCommitmentBody {
                fee_receiver: 0,
                combined_signature: Signature::default(),
                body_hash: Some([0x20 + index_in_batch; 32]),
            }),
        }
    }

    fn batch(id: u64, batch_type: BatchType, prev_state_root: Option<Hash>) -> Batch {
        Batch {
            id: U256::from(id),
            batch_type,
            transaction_hash: [0u8; 32],
            hash: Some([id as u8; 32]),
            finalisation_block: None,
            account_tree_root: None,
            prev_state_root,
            mined_time: None,
        }
    }

    fn batch_root(commitments: &[Commitment]) -> Hash {
        let leaves: Vec<Hash> = commitments
            .iter()
            .map(|commitment| commitment.leaf_hash().unwrap())
            .collect();
        MerkleTree::new(&leaves).unwrap().root()
    }

    #[test]
    fn test_previous_commitment_in_same_batch() {
        let prover = Prover::new(Storage::new(&Config::default()).unwrap());
        let commitments: Vec<Commitment> = (0..3).map(|index| commitment(4, index)).collect();

        let proof = prover
            .previous_commitment_inclusion_proof(U256::from(4), &commitments, 1)
            .unwrap();
        assert_eq!(proof.state_root, commitments[1].post_state_root);
        assert_eq!(proof.body_root, [0x21; 32]);
        assert_eq!(proof.path, MerklePath { path: 1, depth: 3 });
        assert_eq!(proof.witness.len(), 2);
        assert_eq!(proof.compute_root().unwrap(), batch_root(&commitments));
    }

    #[test]
    fn test_previous_commitment_index_out_of_range() {
        let prover = Prover::new(Storage::new(&Config::default()).unwrap());
        let commitments = vec![commitment(4, 0)];
        for index in [1, -2] {
            assert_eq!(
                prover.previous_commitment_inclusion_proof(U256::from(4), &commitments, index),
                Err(ProverError::CommitmentIndexOutOfRange { index, len: 1 })
            );
        }
    }

    #[test]
    fn test_last_commitment_of_previous_batch() {
        let storage = Storage::new(&Config::default()).unwrap();
        storage.add_batch(&batch(1, BatchType::Transfer, Some([1u8; 32]))).unwrap();
        let previous: Vec<Commitment> = (0..2).map(|index| commitment(1, index)).collect();
        for commitment in &previous {
            storage.add_commitment(commitment).unwrap();
        }
        let prover = Prover::new(storage);

        let proof = prover
            .previous_commitment_inclusion_proof(U256::from(2), &[commitment(2, 0)], -1)
            .unwrap();
        assert_eq!(proof.state_root, previous[1].post_state_root);
        assert_eq!(proof.path, MerklePath { path: 1, depth: 2 });
        assert_eq!(proof.compute_root().unwrap(), batch_root(&previous));
    }

    #[test]
    fn test_genesis_predecessor() {
        let storage = Storage::new(&Config::default()).unwrap();
        let genesis_root = [0x77; 32];
        storage
            .add_batch(&batch(0, BatchType::Genesis, Some(genesis_root)))
            .unwrap();
        let prover = Prover::new(storage);

        let proof = prover.previous_batch_commitment_inclusion_proof(U256::from(1)).unwrap();
        assert_eq!(
            proof,
            CommitmentInclusionProof {
                state_root: genesis_root,
                body_root: zero_hash(0),
                path: MerklePath { path: 0, depth: 1 },
                witness: Vec::new(),
            }
        );
    }

    #[test]
    fn test_missing_previous_batch() {
        let prover = Prover::new(Storage::new(&Config::default()).unwrap());
        assert!(prover
            .previous_batch_commitment_inclusion_proof(U256::from(3))
            .unwrap_err()
            .is_not_found());
        assert!(prover
            .previous_batch_commitment_inclusion_proof(U256::from(1))
            .unwrap_err()
            .is_not_found());
        assert!(prover
            .previous_batch_commitment_inclusion_proof(U256::ZERO)
            .unwrap_err()
            .is_not_found());
    }
}
