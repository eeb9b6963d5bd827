//! Vacancy proofs for deposit subtrees

use commander_smt::{MAX_DEPTH, MerkleError, MerklePath};
use commander_storage::Storage;

use crate::{error::ProverError, proofs::SubtreeVacancyProof, prover::Prover};

impl Prover {
    /// Proof that the subtree of height `subtree_depth` starting at
    /// `start_state_id` is empty
    pub fn vacancy_proof(
        &self,
        start_state_id: u32,
        subtree_depth: u8,
    ) -> Result<SubtreeVacancyProof, ProverError> {
        self.read_snapshot(|storage| vacancy_proof(storage, start_state_id, subtree_depth))
    }

    /// Find the first vacant subtree of height `subtree_depth` and prove it
    /// empty. Returns the first state ID of the subtree with the proof.
    pub fn next_vacancy_proof(
        &self,
        subtree_depth: u8,
    ) -> Result<(u32, SubtreeVacancyProof), ProverError> {
        self.read_snapshot(|storage| {
            let start_state_id = storage.state_tree.next_vacant_subtree(subtree_depth)?;
            let proof = vacancy_proof(storage, start_state_id, subtree_depth)?;
            tracing::debug!(
                target: "prover",
                start_state_id,
                subtree_depth,
                "Found vacant subtree"
            );
            Ok((start_state_id, proof))
        })
    }
}

fn vacancy_proof(
    storage: &Storage,
    start_state_id: u32,
    subtree_depth: u8,
) -> Result<SubtreeVacancyProof, ProverError> {
    let depth = MAX_DEPTH
        .checked_sub(subtree_depth)
        .ok_or(MerkleError::TooDeep { max: MAX_DEPTH })?;
    let path_at_depth = start_state_id
        .checked_shr(u32::from(subtree_depth))
        .unwrap_or_default();
    let witness = storage
        .state_tree
        .get_node_witness(MerklePath::new(path_at_depth, depth)?)?;
    Ok(SubtreeVacancyProof {
        path_at_depth,
        witness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use commander_storage::{Config, UserState};

    fn prover_with_states(state_ids: &[u32]) -> Prover {
        let storage = Storage::new(&Config::default()).unwrap();
        for &state_id in state_ids {
            storage
                .state_tree
                .set(state_id, &UserState::default())
                .unwrap();
        }
        Prover::new(storage)
    }

    #[test]
    fn test_vacancy_proof_on_empty_tree() {
        let prover = prover_with_states(&[]);
        let (start, proof) = prover.next_vacancy_proof(2).unwrap();
        assert_eq!(start, 0);
        assert_eq!(proof.path_at_depth, 0);
        assert_eq!(proof.witness.len(), 30);
    }

    #[test]
    fn test_vacancy_proof_skips_occupied_subtrees() {
        let prover = prover_with_states(&[0]);
        let (start, proof) = prover.next_vacancy_proof(2).unwrap();
        assert_eq!(start, 4);
        assert_eq!(proof.path_at_depth, 1);

        let prover = prover_with_states(&[0, 4]);
        let (start, proof) = prover.next_vacancy_proof(2).unwrap();
        assert_eq!(start, 8);
        assert_eq!(proof.path_at_depth, 2);
        assert_eq!(proof.witness.len(), 30);
    }

    #[test]
    fn test_vacancy_proof_recomputes_state_root() {
        let prover = prover_with_states(&[0, 1, 5]);
        let root = prover.storage().state_tree.root().unwrap();

        let (start, proof) = prover.next_vacancy_proof(2).unwrap();
        assert_eq!(start, 8);
        assert_eq!(proof.compute_root(2).unwrap(), root);
        assert_eq!(prover.vacancy_proof(start, 2).unwrap(), proof);
    }

    #[test]
    fn test_occupied_subtree_does_not_prove_vacancy() {
        let prover = prover_with_states(&[5]);
        let root = prover.storage().state_tree.root().unwrap();
        let proof = prover.vacancy_proof(4, 2).unwrap();
        assert_ne!(proof.compute_root(2).unwrap(), root);
    }

    #[test]
    fn test_subtree_deeper_than_tree() {
        let prover = prover_with_states(&[]);
        assert_eq!(
            prover.vacancy_proof(0, MAX_DEPTH + 1),
            Err(ProverError::Merkle(MerkleError::TooDeep { max: MAX_DEPTH }))
        );
    }
}
