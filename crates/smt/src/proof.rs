//! Merkle inclusion proofs

use serde::{Deserialize, Serialize};

use crate::{Hash, error::MerkleError, hasher::Keccak256Hasher, path::MerklePath};

/// Fold `witness` over `leaf` from the node at `path` up to the root.
///
/// The witness is ordered leaf to root and must have `path.depth` entries.
pub fn compute_root(leaf: &Hash, path: MerklePath, witness: &[Hash]) -> Result<Hash, MerkleError> {
    if witness.len() != usize::from(path.depth) {
        return Err(MerkleError::InvalidWitnessLength {
            expected: usize::from(path.depth),
            actual: witness.len(),
        });
    }

    let mut current = *leaf;
    let mut index = path.path;
    for sibling in witness {
        current = if index & 1 == 1 {
            Keccak256Hasher::hash_pair(sibling, &current)
        } else {
            Keccak256Hasher::hash_pair(&current, sibling)
        };
        index >>= 1;
    }
    Ok(current)
}

/// Inclusion proof of a node hash under a Merkle root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Position of the proven node
    pub path: MerklePath,
    /// Hash of the proven node
    pub leaf: Hash,
    /// Sibling hashes from the node up to the root
    pub witness: Vec<Hash>,
}

impl MerkleProof {
    /// Root implied by this proof
    pub fn compute_root(&self) -> Result<Hash, MerkleError> {
        compute_root(&self.leaf, self.path, &self.witness)
    }

    /// Verify this proof against a root hash
    pub fn verify(&self, root: &Hash) -> bool {
        self.compute_root().is_ok_and(|computed| computed == *root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MerkleTree, zero_hash};

    #[test]
    fn test_empty_subtree_root() {
        let path = MerklePath::new(0, 3).unwrap();
        let witness = vec![zero_hash(0), zero_hash(1), zero_hash(2)];
        assert_eq!(compute_root(&zero_hash(0), path, &witness).unwrap(), zero_hash(3));
    }

    #[test]
    fn test_verify() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
        let tree = MerkleTree::new(&leaves).unwrap();
        let proof = MerkleProof {
            path: MerklePath::new(2, 2).unwrap(),
            leaf: leaves[2],
            witness: tree.witness(2).unwrap(),
        };
        assert!(proof.verify(&tree.root()));

        let forged = MerkleProof {
            leaf: leaves[1],
            ..proof.clone()
        };
        assert!(!forged.verify(&tree.root()));

        let json = serde_json::to_string(&proof).unwrap();
        let decoded: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn test_witness_length_mismatch() {
        let path = MerklePath::new(0, 2).unwrap();
        assert_eq!(
            compute_root(&[0u8; 32], path, &[[0u8; 32]]),
            Err(MerkleError::InvalidWitnessLength {
                expected: 2,
                actual: 1
            })
        );
    }
}
