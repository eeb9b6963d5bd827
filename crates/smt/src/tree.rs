//! Dense in-memory Merkle tree

use crate::{Hash, MAX_DEPTH, error::MerkleError, hasher::Keccak256Hasher, path::MerklePath, zero_hash};

/// A complete binary Merkle tree built over a list of leaves.
///
/// Used for per-batch commitment trees and other short-lived trees. Nodes are
/// stored in a flat array starting with the root, then the two nodes of the
/// first level left to right, and so on down to the leaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<Hash>,
    /// Number of layers, leaves included
    depth: u8,
}

impl MerkleTree {
    /// Build a tree over `leaves`.
    ///
    /// The bottom layer is padded to a power of two with
    /// `zero_hash(depth - 1)`, which is the padding the on-chain batch
    /// contracts expect for commitment trees.
    pub fn new(leaves: &[Hash]) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        if leaves.len() > 1 << (MAX_DEPTH - 1) {
            return Err(MerkleError::TreeTooLarge(leaves.len()));
        }

        let depth = leaves.len().next_power_of_two().trailing_zeros() as u8 + 1;
        let mut tree = Self {
            nodes: vec![zero_hash(depth - 1); (1 << depth) - 1],
            depth,
        };

        let first_leaf = node_index(MerklePath {
            path: 0,
            depth: depth - 1,
        });
        tree.nodes[first_leaf..first_leaf + leaves.len()].copy_from_slice(leaves);

        for index in (0..first_leaf).rev() {
            let left = tree.nodes[2 * index + 1];
            let right = tree.nodes[2 * index + 2];
            tree.nodes[index] = Keccak256Hasher::hash_pair(&left, &right);
        }
        Ok(tree)
    }

    /// Number of layers, leaves included
    pub const fn depth(&self) -> u8 {
        self.depth
    }

    /// Root hash
    pub fn root(&self) -> Hash {
        self.nodes[0]
    }

    /// Node at `path`, if the tree is deep and wide enough to have it
    pub fn node(&self, path: MerklePath) -> Option<Hash> {
        if path.depth >= self.depth || u64::from(path.path) >> path.depth != 0 {
            return None;
        }
        self.nodes.get(node_index(path)).copied()
    }

    /// Sibling hashes of the leaf at `index`, leaf to root.
    ///
    /// The witness has `depth - 1` entries.
    pub fn witness(&self, index: u32) -> Result<Vec<Hash>, MerkleError> {
        let leaf = MerklePath::new(index, self.depth - 1)?;
        Ok(leaf
            .witness_paths()
            .into_iter()
            .map(|sibling| self.nodes[node_index(sibling)])
            .collect())
    }
}

const fn node_index(path: MerklePath) -> usize {
    (1usize << path.depth) + path.path as usize - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_root;

    fn leaf(byte: u8) -> Hash {
        [byte; 32]
    }

    #[test]
    fn test_single_leaf() {
        let tree = MerkleTree::new(&[leaf(1)]).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.root(), leaf(1));
        assert!(tree.witness(0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(MerkleTree::new(&[]), Err(MerkleError::EmptyTree));
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::new(&[leaf(1), leaf(2)]).unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.root(), Keccak256Hasher::hash_pair(&leaf(1), &leaf(2)));
        assert_eq!(tree.witness(0).unwrap(), vec![leaf(2)]);
        assert_eq!(tree.witness(1).unwrap(), vec![leaf(1)]);
    }

    #[test]
    fn test_padding() {
        let tree = MerkleTree::new(&[leaf(1), leaf(2), leaf(3)]).unwrap();
        assert_eq!(tree.depth(), 3);

        let padding = zero_hash(2);
        let left = Keccak256Hasher::hash_pair(&leaf(1), &leaf(2));
        let right = Keccak256Hasher::hash_pair(&leaf(3), &padding);
        assert_eq!(tree.root(), Keccak256Hasher::hash_pair(&left, &right));
        assert_eq!(tree.node(MerklePath { path: 3, depth: 2 }), Some(padding));
        assert_eq!(tree.node(MerklePath { path: 0, depth: 3 }), None);
    }

    #[test]
    fn test_witnesses_rebuild_root() {
        let leaves: Vec<Hash> = (0..5).map(leaf).collect();
        let tree = MerkleTree::new(&leaves).unwrap();
        assert_eq!(tree.depth(), 4);

        for (index, hash) in leaves.iter().enumerate() {
            let witness = tree.witness(index as u32).unwrap();
            assert_eq!(witness.len(), 3);
            let path = MerklePath::new(index as u32, tree.depth() - 1).unwrap();
            assert_eq!(compute_root(hash, path, &witness).unwrap(), tree.root());
        }
    }

    #[test]
    fn test_witness_out_of_range() {
        let tree = MerkleTree::new(&[leaf(1), leaf(2)]).unwrap();
        assert!(matches!(
            tree.witness(2),
            Err(MerkleError::PathOutOfRange { path: 2, depth: 1 })
        ));
    }
}
