//! Proof types handed to the dispute and deposit pipelines.
//!
//! Each proof can recompute the root it commits to, so a consumer can check
//! it against the tree root it expects before submitting it.

use commander_smt::{
    Hash, Keccak256Hasher, MAX_DEPTH, MerkleError, MerklePath, compute_root, zero_hash,
};
pub use commander_storage::StateMerkleProof;
use commander_storage::PublicKey;
use serde::{Deserialize, Serialize};

/// A registered public key and its witness in the account tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyProof {
    /// The proven key
    pub public_key: PublicKey,
    /// Siblings from the leaf up to the root
    pub witness: Vec<Hash>,
}

impl PublicKeyProof {
    /// Account root implied by the key registered under `pub_key_id`
    pub fn compute_root(&self, pub_key_id: u32) -> Result<Hash, MerkleError> {
        let leaf = Keccak256Hasher::hash(self.public_key.as_bytes());
        compute_root(&leaf, MerklePath::leaf(pub_key_id), &self.witness)
    }
}

/// Account tree leaf of a transfer receiver.
///
/// A receiver that is not registered yet is proven with the empty leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverPublicKeyProof {
    /// Hash of the receiver's public key, or `zero_hash(0)`
    pub public_key_hash: Hash,
    /// Siblings from the leaf up to the root
    pub witness: Vec<Hash>,
}

impl ReceiverPublicKeyProof {
    /// Account root implied by this leaf sitting at `pub_key_id`
    pub fn compute_root(&self, pub_key_id: u32) -> Result<Hash, MerkleError> {
        compute_root(&self.public_key_hash, MerklePath::leaf(pub_key_id), &self.witness)
    }
}

/// Inputs for checking the aggregated signature of a commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProof {
    /// Sender states, one per transaction
    pub user_states: Vec<StateMerkleProof>,
    /// Sender public keys, in the same order
    pub public_keys: Vec<PublicKeyProof>,
}

/// [`SignatureProof`] for commitments whose transactions also sign over the
/// receiver's public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProofWithReceiver {
    /// Sender states, one per transaction
    pub user_states: Vec<StateMerkleProof>,
    /// Sender public keys, in the same order
    pub sender_public_keys: Vec<PublicKeyProof>,
    /// Receiver account leaves, in the same order
    pub receiver_public_keys: Vec<ReceiverPublicKeyProof>,
}

/// Inclusion of a commitment in the commitment tree of its batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentInclusionProof {
    /// Post-state root of the commitment
    pub state_root: Hash,
    /// Body hash of the commitment
    pub body_root: Hash,
    /// Commitment index and number of layers of the commitment tree
    pub path: MerklePath,
    /// Siblings from the commitment up to the batch root
    pub witness: Vec<Hash>,
}

impl CommitmentInclusionProof {
    /// Leaf of the commitment in the batch tree
    pub fn leaf_hash(&self) -> Hash {
        Keccak256Hasher::hash_pair(&self.state_root, &self.body_root)
    }

    /// Commitment root of the batch
    pub fn compute_root(&self) -> Result<Hash, MerkleError> {
        let depth = u8::try_from(self.witness.len())
            .map_err(|_| MerkleError::TooDeep { max: MAX_DEPTH })?;
        let path = MerklePath::new(self.path.path, depth)?;
        compute_root(&self.leaf_hash(), path, &self.witness)
    }
}

/// Proof that a whole state subtree holds nothing but empty leaves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeVacancyProof {
    /// Index of the subtree root among the nodes at its depth
    pub path_at_depth: u32,
    /// Siblings from the subtree root up to the state root
    pub witness: Vec<Hash>,
}

impl SubtreeVacancyProof {
    /// State root implied by an empty subtree of height `subtree_depth`
    pub fn compute_root(&self, subtree_depth: u8) -> Result<Hash, MerkleError> {
        let depth = MAX_DEPTH
            .checked_sub(subtree_depth)
            .ok_or(MerkleError::TooDeep { max: MAX_DEPTH })?;
        let path = MerklePath::new(self.path_at_depth, depth)?;
        compute_root(&zero_hash(subtree_depth), path, &self.witness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commander_smt::MerkleTree;

    #[test]
    fn test_commitment_proof_ignores_layer_count_in_path() {
        let leaves: Vec<Hash> = (1..=3u8).map(|byte| [byte; 32]).collect();
        let tree = MerkleTree::new(&leaves).unwrap();
        let proof = CommitmentInclusionProof {
            state_root: [1u8; 32],
            body_root: [2u8; 32],
            path: MerklePath::new(2, tree.depth()).unwrap(),
            witness: tree.witness(2).unwrap(),
        };
        let expected = {
            let mut leaves = leaves;
            leaves[2] = proof.leaf_hash();
            MerkleTree::new(&leaves).unwrap().root()
        };
        assert_eq!(proof.compute_root().unwrap(), expected);
    }

    #[test]
    fn test_proofs_serialize() {
        let proof = SubtreeVacancyProof {
            path_at_depth: 3,
            witness: vec![[0xab; 32]],
        };
        let json = serde_json::to_string(&proof).unwrap();
        assert_eq!(serde_json::from_str::<SubtreeVacancyProof>(&json).unwrap(), proof);
    }
}
