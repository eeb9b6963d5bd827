//! Merkle primitives shared by the commander trees
//!
//! Every tree in the commander is a binary Keccak-256 tree of at most
//! [`MAX_DEPTH`] levels. Absent subtrees are never stored: a missing node at
//! depth `d` stands for [`zero_hash`]`(MAX_DEPTH - d)`, the root of a subtree
//! whose leaves are all [`zero_hash`]`(0)`.

mod error;
mod hasher;
mod path;
mod proof;
mod tree;

use std::sync::OnceLock;

pub use error::MerkleError;
pub use hasher::Keccak256Hasher;
pub use path::MerklePath;
pub use proof::{MerkleProof, compute_root};
pub use tree::MerkleTree;

/// 32-byte hash type
pub type Hash = [u8; 32];

/// Depth of the state and account trees
pub const MAX_DEPTH: u8 = 32;

/// `keccak256(abi.encode(0))`, the hash of an empty leaf
pub const ZERO_LEAF: Hash = [
    0x29, 0x0d, 0xec, 0xd9, 0x54, 0x8b, 0x62, 0xa8, 0xd6, 0x03, 0x45, 0xa9, 0x88, 0x38, 0x6f, 0xc8,
    0x4b, 0xa6, 0xbc, 0x95, 0x48, 0x40, 0x08, 0xf6, 0x36, 0x2f, 0x93, 0x16, 0x0e, 0xf3, 0xe5, 0x63,
];

static ZERO_HASHES: OnceLock<[Hash; MAX_DEPTH as usize + 1]> = OnceLock::new();

/// Roots of empty subtrees, indexed by subtree height
pub fn zero_hashes() -> &'static [Hash; MAX_DEPTH as usize + 1] {
    ZERO_HASHES.get_or_init(|| {
        let mut hashes = [ZERO_LEAF; MAX_DEPTH as usize + 1];
        for level in 1..hashes.len() {
            hashes[level] = Keccak256Hasher::hash_pair(&hashes[level - 1], &hashes[level - 1]);
        }
        hashes
    })
}

/// Root of an empty subtree of height `level`.
///
/// # Panics
///
/// If `level` exceeds [`MAX_DEPTH`].
pub fn zero_hash(level: u8) -> Hash {
    zero_hashes()[usize::from(level)]
}

/// Hash of an absent node at `path`
pub fn empty_node(path: MerklePath) -> Hash {
    zero_hash(MAX_DEPTH - path.depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_leaf_is_keccak_of_zero_word() {
        assert_eq!(Keccak256Hasher::hash(&[0u8; 32]), ZERO_LEAF);
    }

    #[test]
    fn test_zero_hash_chain() {
        assert_eq!(zero_hash(0), ZERO_LEAF);
        assert_eq!(
            hex::encode(zero_hash(1)),
            "633dc4d7da7256660a892f8f1604a44b5432649cc8ec5cb3ced4c4e6ac94dd1d"
        );
        for level in 1..=MAX_DEPTH {
            assert_eq!(
                zero_hash(level),
                Keccak256Hasher::hash_pair(&zero_hash(level - 1), &zero_hash(level - 1))
            );
        }
    }

    #[test]
    fn test_empty_node() {
        assert_eq!(empty_node(MerklePath::root()), zero_hash(MAX_DEPTH));
        assert_eq!(empty_node(MerklePath::leaf(7)), ZERO_LEAF);
    }
}
