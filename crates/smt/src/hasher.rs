//! Keccak256 hasher for Merkle trees

use tiny_keccak::{Hasher, Keccak};

use crate::Hash;

/// Keccak256 hasher
#[derive(Clone, Copy, Debug, Default)]
pub struct Keccak256Hasher;

impl Keccak256Hasher {
    /// Hash two 32-byte values together
    pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        Self::hash_parts(&[left.as_slice(), right.as_slice()])
    }

    /// Hash a single value
    pub fn hash(data: &[u8]) -> Hash {
        Self::hash_parts(&[data])
    }

    /// Hash the concatenation of `parts`
    pub fn hash_parts(parts: &[&[u8]]) -> Hash {
        let mut hasher = Keccak::v256();
        for part in parts {
            hasher.update(part);
        }
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_pair() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        let hash = Keccak256Hasher::hash_pair(&left, &right);
        assert_ne!(hash, [0u8; 32]);
        assert_ne!(hash, Keccak256Hasher::hash_pair(&right, &left));
    }

    #[test]
    fn test_hash_parts_is_concatenation() {
        let mut joined = vec![1u8; 32];
        joined.extend_from_slice(&[2u8; 32]);
        assert_eq!(
            Keccak256Hasher::hash(&joined),
            Keccak256Hasher::hash_pair(&[1u8; 32], &[2u8; 32])
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            hex::encode(Keccak256Hasher::hash(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
