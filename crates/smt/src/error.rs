//! Merkle errors

use thiserror::Error;

/// Errors raised by Merkle path arithmetic and tree construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// The root has no parent.
    #[error("cannot get parent at depth 0")]
    NoParent,
    /// The root has no sibling.
    #[error("cannot get sibling at depth 0")]
    NoSibling,
    /// A path cannot be deeper than the tree.
    #[error("cannot have a path deeper than {max}")]
    TooDeep {
        /// Maximum supported depth
        max: u8,
    },
    /// The node index does not exist at the given depth.
    #[error("invalid index {path} at depth {depth}")]
    PathOutOfRange {
        /// Offending node index
        path: u64,
        /// Depth of the node
        depth: u8,
    },
    /// Moving a path right overflowed `u32`.
    #[error("uint32 overflow")]
    Overflow,
    /// Moving a path left underflowed `u32`.
    #[error("uint32 underflow")]
    Underflow,
    /// A serialized value had the wrong size.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected number of bytes
        expected: usize,
        /// Actual number of bytes
        actual: usize,
    },
    /// A bit-string path contained something other than `0` and `1`.
    #[error("invalid bit string path {0:?}")]
    InvalidBitString(String),
    /// A tree needs at least one leaf.
    #[error("cannot build a merkle tree without leaves")]
    EmptyTree,
    /// The leaves do not fit into a tree of the maximum depth.
    #[error("merkle tree too large: {0} leaves")]
    TreeTooLarge(usize),
    /// A witness does not match the depth of the path it proves.
    #[error("invalid witness length: expected {expected}, got {actual}")]
    InvalidWitnessLength {
        /// Depth of the proven path
        expected: usize,
        /// Number of sibling hashes supplied
        actual: usize,
    },
}
