//! Registry of BLS public keys.
//!
//! The left half of the tree holds accounts registered one by one, the right
//! half holds accounts registered in batches of [`ACCOUNT_BATCH_SIZE`].

use commander_db::{CursorOptions, Database, DbError, TxOptions};
use commander_smt::{Hash, MerklePath};

use crate::{
    error::StorageError,
    keys::{
        ACCOUNT_LEAF_PREFIX, ACCOUNT_PUBLIC_KEY_INDEX, account_leaf_key, decode_u32, suffix,
    },
    merkle_tree::StoredMerkleTree,
    types::{AccountLeaf, PublicKey},
};

/// Namespace of the account tree nodes
pub const ACCOUNT_TREE_NAMESPACE: &str = "account";

/// Number of accounts registered by one batch registration
pub const ACCOUNT_BATCH_SIZE: usize = 16;

/// First public key ID of the batch range
pub const ACCOUNT_BATCH_OFFSET: u32 = 1 << 31;

/// Highest public key ID of a single registration
pub const LEFT_SUBTREE_MAX_VALUE: u32 = ACCOUNT_BATCH_OFFSET - 2;

/// Highest public key ID of a batch registration
pub const RIGHT_SUBTREE_MAX_VALUE: u32 = u32::MAX - 17;

/// Tree of registered public keys indexed by public key ID.
#[derive(Clone, Debug)]
pub struct AccountTree {
    database: Database,
    merkle_tree: StoredMerkleTree,
}

impl AccountTree {
    /// Open the account tree
    pub fn new(database: Database) -> Self {
        Self {
            merkle_tree: StoredMerkleTree::new(ACCOUNT_TREE_NAMESPACE, database.clone()),
            database,
        }
    }

    pub(crate) fn copy_with_new_database(&self, database: Database) -> Self {
        Self::new(database)
    }

    /// Current root
    pub fn root(&self) -> Result<Hash, StorageError> {
        self.merkle_tree.root()
    }

    /// Leaf at `pub_key_id`
    pub fn leaf(&self, pub_key_id: u32) -> Result<AccountLeaf, StorageError> {
        self.database.view(|txn| {
            let bytes = txn
                .get(&account_leaf_key(pub_key_id))?
                .ok_or(StorageError::NotFound("account leaf"))?;
            decode_leaf(pub_key_id, &bytes)
        })
    }

    /// All leaves registered for `public_key`
    pub fn leaves(&self, public_key: &PublicKey) -> Result<Vec<AccountLeaf>, StorageError> {
        let ids = self.database.view(|txn| {
            txn.index_lookup(ACCOUNT_PUBLIC_KEY_INDEX, public_key.as_bytes())?
                .iter()
                .map(|primary| decode_u32(primary))
                .collect::<Result<Vec<_>, StorageError>>()
        })?;
        if ids.is_empty() {
            return Err(StorageError::NotFound("account leaves"));
        }
        Ok(ids
            .into_iter()
            .map(|pub_key_id| AccountLeaf {
                pub_key_id,
                public_key: *public_key,
            })
            .collect())
    }

    /// Every registered leaf, by ascending public key ID
    pub fn iter_leaves(&self) -> Result<Vec<AccountLeaf>, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(ACCOUNT_LEAF_PREFIX))?;
            let mut leaves = Vec::new();
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                leaves.push(decode_leaf(decode_u32(suffix(key, ACCOUNT_LEAF_PREFIX))?, value)?);
                cursor.next();
            }
            Ok(leaves)
        })
    }

    /// Register a single account in the left subtree
    pub fn set_single(&self, leaf: &AccountLeaf) -> Result<(), StorageError> {
        if leaf.pub_key_id > LEFT_SUBTREE_MAX_VALUE {
            return Err(StorageError::InvalidPubKeyId(leaf.pub_key_id));
        }
        self.database
            .execute_in_transaction(TxOptions::default(), |database| {
                self.copy_with_new_database(database.clone()).unsafe_set(leaf)
            })
    }

    /// Register a full batch of accounts in the right subtree.
    ///
    /// Either every leaf is stored or none is. All IDs that are already taken
    /// are reported together.
    pub fn set_batch(&self, leaves: &[AccountLeaf]) -> Result<(), StorageError> {
        if leaves.len() != ACCOUNT_BATCH_SIZE {
            return Err(StorageError::InvalidAccountsLength {
                expected: ACCOUNT_BATCH_SIZE,
                actual: leaves.len(),
            });
        }
        if let Some(leaf) = leaves.iter().find(|leaf| {
            !(ACCOUNT_BATCH_OFFSET..=RIGHT_SUBTREE_MAX_VALUE).contains(&leaf.pub_key_id)
        }) {
            return Err(StorageError::InvalidPubKeyId(leaf.pub_key_id));
        }

        self.database
            .execute_in_transaction(TxOptions::default(), |database| {
                let tree = self.copy_with_new_database(database.clone());
                let existing = database.view(|txn| {
                    let mut existing = Vec::new();
                    for leaf in leaves {
                        if txn.exists(&account_leaf_key(leaf.pub_key_id))? {
                            existing.push(leaf.pub_key_id);
                        }
                    }
                    Ok::<_, StorageError>(existing)
                })?;
                if !existing.is_empty() {
                    return Err(StorageError::AccountBatchAlreadyExists(existing));
                }
                leaves.iter().try_for_each(|leaf| tree.unsafe_set(leaf))
            })
    }

    fn unsafe_set(&self, leaf: &AccountLeaf) -> Result<(), StorageError> {
        self.database.update(|txn| {
            txn.insert(
                &account_leaf_key(leaf.pub_key_id),
                leaf.public_key.as_bytes().to_vec(),
            )
            .map_err(|err| match err {
                DbError::KeyExists => {
                    StorageError::AccountAlreadyExists(leaf.pub_key_id)
                }
                err => err.into(),
            })?;
            txn.index_insert(
                ACCOUNT_PUBLIC_KEY_INDEX,
                leaf.public_key.as_bytes(),
                &leaf.pub_key_id.to_be_bytes(),
            )?;
            Ok::<_, StorageError>(())
        })?;
        self.merkle_tree
            .set_node(MerklePath::leaf(leaf.pub_key_id), leaf.hash())?;
        Ok(())
    }

    /// First public key ID of the next batch registration
    pub fn next_batch_account_pub_key_id(&self) -> Result<u32, StorageError> {
        let last = self.database.view(|txn| {
            let cursor = txn.cursor(CursorOptions::prefix(ACCOUNT_LEAF_PREFIX).reverse())?;
            cursor
                .key()
                .map(|key| decode_u32(suffix(key, ACCOUNT_LEAF_PREFIX)))
                .transpose()
        })?;

        let next = match last {
            Some(id) if id >= ACCOUNT_BATCH_OFFSET => u64::from(id) + 1,
            _ => u64::from(ACCOUNT_BATCH_OFFSET),
        };
        if next + ACCOUNT_BATCH_SIZE as u64 - 1 > u64::from(RIGHT_SUBTREE_MAX_VALUE) {
            return Err(StorageError::BatchAccountRangeFull);
        }
        Ok(next as u32)
    }

    /// Witness of the leaf at `pub_key_id`
    pub fn get_witness(&self, pub_key_id: u32) -> Result<Vec<Hash>, StorageError> {
        self.merkle_tree.get_witness(MerklePath::leaf(pub_key_id))
    }
}

fn decode_leaf(pub_key_id: u32, bytes: &[u8]) -> Result<AccountLeaf, StorageError> {
    let public_key = <[u8; PublicKey::LEN]>::try_from(bytes)
        .map_err(|_| StorageError::InvalidLength("account leaf"))?;
    Ok(AccountLeaf {
        pub_key_id,
        public_key: PublicKey(public_key),
    })
}
