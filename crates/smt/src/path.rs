//! Addressing of nodes in a binary Merkle tree

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{MAX_DEPTH, error::MerkleError};

/// Position of a node: its index among the nodes at `depth`.
///
/// The root is `{ path: 0, depth: 0 }` and the leaves of the full tree live
/// at depth [`MAX_DEPTH`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MerklePath {
    /// Node index at its depth
    pub path: u32,
    /// Distance from the root
    pub depth: u8,
}

impl MerklePath {
    /// Serialized size: depth byte followed by the big-endian index
    pub const BYTES: usize = 5;

    /// Build a path, checking it addresses an existing node
    pub fn new(path: u32, depth: u8) -> Result<Self, MerkleError> {
        if depth > MAX_DEPTH {
            return Err(MerkleError::TooDeep { max: MAX_DEPTH });
        }
        if u64::from(path) > max_index(depth) {
            return Err(MerkleError::PathOutOfRange {
                path: u64::from(path),
                depth,
            });
        }
        Ok(Self { path, depth })
    }

    /// The root node
    pub const fn root() -> Self {
        Self { path: 0, depth: 0 }
    }

    /// The leaf of the full-depth tree at `index`
    pub const fn leaf(index: u32) -> Self {
        Self {
            path: index,
            depth: MAX_DEPTH,
        }
    }

    /// Whether this is the root
    pub const fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Whether this node is its parent's left child
    pub const fn is_left_node(&self) -> bool {
        self.path % 2 == 0
    }

    /// Whether this node is its parent's right child
    pub const fn is_right_node(&self) -> bool {
        !self.is_left_node()
    }

    /// Move `value` nodes right on the same level
    pub fn add(self, value: u32) -> Result<Self, MerkleError> {
        let path = self.path.checked_add(value).ok_or(MerkleError::Overflow)?;
        if u64::from(path) > max_index(self.depth) {
            return Err(MerkleError::PathOutOfRange {
                path: u64::from(path),
                depth: self.depth,
            });
        }
        Ok(Self { path, ..self })
    }

    /// Move `value` nodes left on the same level
    pub fn sub(self, value: u32) -> Result<Self, MerkleError> {
        let path = self.path.checked_sub(value).ok_or(MerkleError::Underflow)?;
        Ok(Self { path, ..self })
    }

    /// Parent node
    pub const fn parent(self) -> Result<Self, MerkleError> {
        if self.depth == 0 {
            return Err(MerkleError::NoParent);
        }
        Ok(Self {
            path: self.path >> 1,
            depth: self.depth - 1,
        })
    }

    /// Left or right child
    pub const fn child(self, right: bool) -> Result<Self, MerkleError> {
        if self.depth >= MAX_DEPTH {
            return Err(MerkleError::TooDeep { max: MAX_DEPTH });
        }
        Ok(Self {
            path: (self.path << 1) | right as u32,
            depth: self.depth + 1,
        })
    }

    /// The other child of this node's parent
    pub fn sibling(self) -> Result<Self, MerkleError> {
        if self.depth == 0 {
            return Err(MerkleError::NoSibling);
        }
        if self.is_left_node() { self.add(1) } else { self.sub(1) }
    }

    /// Siblings of every node from this one up to, but excluding, the root.
    ///
    /// The first entry is this node's sibling. The result has `depth` entries.
    pub fn witness_paths(self) -> Vec<Self> {
        let mut paths = Vec::with_capacity(usize::from(self.depth));
        let mut current = self;
        while current.depth > 0 {
            paths.push(Self {
                path: current.path ^ 1,
                depth: current.depth,
            });
            current = Self {
                path: current.path >> 1,
                depth: current.depth - 1,
            };
        }
        paths
    }

    /// Depth byte followed by the big-endian index
    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut bytes = [0u8; Self::BYTES];
        bytes[0] = self.depth;
        bytes[1..].copy_from_slice(&self.path.to_be_bytes());
        bytes
    }

    /// Inverse of [`MerklePath::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerkleError> {
        let bytes: [u8; Self::BYTES] = bytes.try_into().map_err(|_| MerkleError::InvalidLength {
            expected: Self::BYTES,
            actual: bytes.len(),
        })?;
        let mut path = [0u8; 4];
        path.copy_from_slice(&bytes[1..]);
        Self::new(u32::from_be_bytes(path), bytes[0])
    }
}

const fn max_index(depth: u8) -> u64 {
    (1u64 << depth) - 1
}

/// Parses the node's bits from the root down, e.g. `"0110"`. The root is `""`.
impl FromStr for MerklePath {
    type Err = MerkleError;

    fn from_str(bits: &str) -> Result<Self, Self::Err> {
        if bits.len() > usize::from(MAX_DEPTH) {
            return Err(MerkleError::TooDeep { max: MAX_DEPTH });
        }
        let mut path = 0u32;
        for bit in bits.chars() {
            let value = match bit {
                '0' => 0,
                '1' => 1,
                _ => return Err(MerkleError::InvalidBitString(bits.to_owned())),
            };
            path = (path << 1) | value;
        }
        Ok(Self {
            path,
            depth: bits.len() as u8,
        })
    }
}

impl fmt::Display for MerklePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            return Ok(());
        }
        write!(f, "{:0width$b}", self.path, width = usize::from(self.depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(bits: &str) -> MerklePath {
        bits.parse().unwrap()
    }

    #[test]
    fn test_parse_bit_string() {
        assert_eq!(path(""), MerklePath::root());
        assert_eq!(path("0110"), MerklePath { path: 6, depth: 4 });
        assert_eq!(path("0110").to_string(), "0110");
        assert!(matches!(
            "012".parse::<MerklePath>(),
            Err(MerkleError::InvalidBitString(_))
        ));
        assert!(matches!(
            "0".repeat(33).parse::<MerklePath>(),
            Err(MerkleError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_new_validates_range() {
        assert!(MerklePath::new(3, 2).is_ok());
        assert!(matches!(
            MerklePath::new(4, 2),
            Err(MerkleError::PathOutOfRange { path: 4, depth: 2 })
        ));
        assert!(MerklePath::new(u32::MAX, 32).is_ok());
        assert!(matches!(MerklePath::new(0, 33), Err(MerkleError::TooDeep { .. })));
    }

    #[test]
    fn test_parent() {
        assert_eq!(path("0110").parent().unwrap(), path("011"));
        assert_eq!(path("1").parent().unwrap(), MerklePath::root());
        assert_eq!(MerklePath::root().parent(), Err(MerkleError::NoParent));
    }

    #[test]
    fn test_child() {
        assert_eq!(path("011").child(false).unwrap(), path("0110"));
        assert_eq!(path("011").child(true).unwrap(), path("0111"));
        assert!(matches!(
            MerklePath::leaf(0).child(false),
            Err(MerkleError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_sibling() {
        assert_eq!(path("0110").sibling().unwrap(), path("0111"));
        assert_eq!(path("0111").sibling().unwrap(), path("0110"));
        assert_eq!(MerklePath::root().sibling(), Err(MerkleError::NoSibling));
        assert!(path("0110").is_left_node());
        assert!(path("0111").is_right_node());
    }

    #[test]
    fn test_add_and_sub() {
        assert_eq!(path("00").add(3).unwrap(), path("11"));
        assert!(matches!(
            path("11").add(1),
            Err(MerkleError::PathOutOfRange { path: 4, depth: 2 })
        ));
        assert_eq!(MerklePath::leaf(u32::MAX).add(1), Err(MerkleError::Overflow));
        assert_eq!(path("11").sub(2).unwrap(), path("01"));
        assert_eq!(path("01").sub(2), Err(MerkleError::Underflow));
    }

    #[test]
    fn test_witness_paths() {
        assert_eq!(
            path("010").witness_paths(),
            vec![path("011"), path("00"), path("1")]
        );
        assert!(MerklePath::root().witness_paths().is_empty());
        assert_eq!(MerklePath::leaf(5).witness_paths().len(), 32);
    }

    #[test]
    fn test_bytes() {
        let original = MerklePath::leaf(0x0102_0304);
        let bytes = original.to_bytes();
        assert_eq!(bytes, [32, 1, 2, 3, 4]);
        assert_eq!(MerklePath::from_bytes(&bytes).unwrap(), original);
        assert_eq!(
            MerklePath::from_bytes(&bytes[..4]),
            Err(MerkleError::InvalidLength {
                expected: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn test_byte_order_follows_path_order() {
        let mut paths = vec![path("10"), path("01"), path("11"), path("00")];
        paths.sort_by_key(MerklePath::to_bytes);
        assert_eq!(paths, vec![path("00"), path("01"), path("10"), path("11")]);
    }
}
