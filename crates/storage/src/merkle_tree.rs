//! Sparse Merkle tree persisted node by node.
//!
//! Only nodes that were written are stored. Reading any other node yields the
//! root of an empty subtree of matching height.

use commander_db::{Database, Txn};
use commander_smt::{Hash, Keccak256Hasher, MAX_DEPTH, MerkleError, MerklePath, zero_hash};

use crate::{error::StorageError, keys::merkle_node_key};

/// Merkle tree whose nodes live in the store under a namespace.
#[derive(Clone, Debug)]
pub struct StoredMerkleTree {
    database: Database,
    namespace: &'static str,
    depth: u8,
}

impl StoredMerkleTree {
    /// Full-depth tree stored under `namespace`
    pub const fn new(namespace: &'static str, database: Database) -> Self {
        Self {
            database,
            namespace,
            depth: MAX_DEPTH,
        }
    }

    /// Tree of `depth` levels below the root
    pub fn with_depth(
        namespace: &'static str,
        depth: u8,
        database: Database,
    ) -> Result<Self, StorageError> {
        if depth > MAX_DEPTH {
            return Err(MerkleError::TooDeep { max: MAX_DEPTH }.into());
        }
        Ok(Self {
            database,
            namespace,
            depth,
        })
    }

    pub(crate) fn copy_with_new_database(&self, database: Database) -> Self {
        Self {
            database,
            ..self.clone()
        }
    }

    /// Number of levels below the root
    pub const fn depth(&self) -> u8 {
        self.depth
    }

    /// Node at `path`
    pub fn get(&self, path: MerklePath) -> Result<Hash, StorageError> {
        self.check_depth(path)?;
        self.database.view(|txn| self.read_node(txn, path))
    }

    /// Current root
    pub fn root(&self) -> Result<Hash, StorageError> {
        self.get(MerklePath::root())
    }

    /// Store `hash` at `path` and rehash every ancestor up to the root.
    ///
    /// Returns the new root and the sibling hashes on the way, leaf first.
    pub fn set_node(&self, path: MerklePath, hash: Hash) -> Result<(Hash, Vec<Hash>), StorageError> {
        self.check_depth(path)?;
        self.database.update(|txn| {
            let mut witness = Vec::with_capacity(usize::from(path.depth));
            let mut current_path = path;
            let mut current_hash = hash;
            txn.upsert(&merkle_node_key(self.namespace, path), hash.to_vec())?;

            while !current_path.is_root() {
                let sibling = self.read_node(txn, current_path.sibling()?)?;
                witness.push(sibling);
                current_hash = if current_path.is_left_node() {
                    Keccak256Hasher::hash_pair(&current_hash, &sibling)
                } else {
                    Keccak256Hasher::hash_pair(&sibling, &current_hash)
                };
                current_path = current_path.parent()?;
                txn.upsert(
                    &merkle_node_key(self.namespace, current_path),
                    current_hash.to_vec(),
                )?;
            }
            Ok((current_hash, witness))
        })
    }

    /// Sibling hashes from `path` up to the root, `path`'s sibling first
    pub fn get_witness(&self, path: MerklePath) -> Result<Vec<Hash>, StorageError> {
        self.check_depth(path)?;
        self.database.view(|txn| {
            path.witness_paths()
                .into_iter()
                .map(|sibling| self.read_node(txn, sibling))
                .collect()
        })
    }

    fn check_depth(&self, path: MerklePath) -> Result<(), StorageError> {
        if path.depth > self.depth {
            return Err(StorageError::Merkle(MerkleError::TooDeep { max: self.depth }));
        }
        Ok(())
    }

    fn read_node(&self, txn: &Txn, path: MerklePath) -> Result<Hash, StorageError> {
        match txn.get(&merkle_node_key(self.namespace, path))? {
            Some(bytes) => {
                Hash::try_from(bytes.as_slice()).map_err(|_| StorageError::InvalidLength("merkle node"))
            }
            None => Ok(zero_hash(self.depth - path.depth)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commander_smt::{ZERO_LEAF, compute_root};

    fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        Keccak256Hasher::hash_pair(left, right)
    }

    #[test]
    fn test_depth_two_tree() {
        let tree = StoredMerkleTree::with_depth("test", 2, Database::default()).unwrap();
        let zero = ZERO_LEAF;
        let empty_pair = hash_pair(&zero, &zero);
        assert_eq!(tree.root().unwrap(), hash_pair(&empty_pair, &empty_pair));

        let leaf = Keccak256Hasher::hash(b"leaf");
        let path = MerklePath::new(0, 2).unwrap();
        let (root, witness) = tree.set_node(path, leaf).unwrap();

        assert_eq!(tree.get_witness(path).unwrap(), vec![zero, empty_pair]);
        assert_eq!(witness, vec![zero, empty_pair]);
        assert_eq!(root, hash_pair(&hash_pair(&leaf, &zero), &empty_pair));
        assert_eq!(tree.root().unwrap(), root);
    }

    #[test]
    fn test_witness_recomputes_root() {
        let tree = StoredMerkleTree::new("test", Database::default());
        for index in [0u32, 1, 5, 1 << 20, u32::MAX] {
            tree.set_node(MerklePath::leaf(index), Keccak256Hasher::hash(&index.to_be_bytes()))
                .unwrap();
        }
        let root = tree.root().unwrap();
        for index in [0u32, 5, 6, u32::MAX] {
            let path = MerklePath::leaf(index);
            let leaf = tree.get(path).unwrap();
            let witness = tree.get_witness(path).unwrap();
            assert_eq!(witness.len(), 32);
            assert_eq!(compute_root(&leaf, path, &witness).unwrap(), root);
        }
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let database = Database::default();
        let state = StoredMerkleTree::new("state", database.clone());
        let account = StoredMerkleTree::new("account", database);
        state.set_node(MerklePath::leaf(3), [1u8; 32]).unwrap();
        assert_eq!(account.root().unwrap(), zero_hash(MAX_DEPTH));
        assert_ne!(state.root().unwrap(), zero_hash(MAX_DEPTH));
    }

    #[test]
    fn test_path_deeper_than_tree() {
        let tree = StoredMerkleTree::with_depth("test", 4, Database::default()).unwrap();
        assert!(tree.get(MerklePath::leaf(0)).is_err());
        assert!(StoredMerkleTree::with_depth("test", 33, Database::default()).is_err());
    }
}
