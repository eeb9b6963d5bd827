//! State tree with a journal of updates that can be reverted

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use commander_db::{CursorOptions, Database, TxOptions, Txn};
use commander_smt::{Hash, MAX_DEPTH, MerkleError, MerklePath, compute_root};
use serde::{Deserialize, Serialize};

use crate::{
    error::StorageError,
    keys::{
        STATE_LEAF_PREFIX, STATE_UPDATE_PREFIX, decode_u32, decode_u64, state_leaf_key,
        state_update_key, suffix,
    },
    merkle_tree::StoredMerkleTree,
    types::{StateLeaf, StateUpdate, UserState},
};

/// Namespace of the state tree nodes
pub const STATE_TREE_NAMESPACE: &str = "state";

/// A user state and its witness in the state tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMerkleProof {
    /// The proven state
    pub user_state: UserState,
    /// Siblings from the leaf up to the root
    pub witness: Vec<Hash>,
}

impl StateMerkleProof {
    /// State root implied by the state sitting at `state_id`
    pub fn compute_root(&self, state_id: u32) -> Result<Hash, MerkleError> {
        compute_root(&self.user_state.hash(), MerklePath::leaf(state_id), &self.witness)
    }
}

/// Tree of user states indexed by state ID.
///
/// Every [`StateTree::set`] appends a [`StateUpdate`] to a journal so the tree
/// can later be rolled back to any root it had. Handles cloned from one tree,
/// or copied onto another database handle, share the cached leaf count.
#[derive(Clone, Debug)]
pub struct StateTree {
    database: Database,
    merkle_tree: StoredMerkleTree,
    leaf_count: Arc<AtomicU64>,
}

impl StateTree {
    /// Open the state tree, counting the stored leaves once
    pub fn new(database: Database) -> Result<Self, StorageError> {
        let leaf_count = database.view(|txn| count_keys(txn, STATE_LEAF_PREFIX))?;
        Ok(Self {
            merkle_tree: StoredMerkleTree::new(STATE_TREE_NAMESPACE, database.clone()),
            database,
            leaf_count: Arc::new(AtomicU64::new(leaf_count)),
        })
    }

    pub(crate) fn copy_with_new_database(&self, database: Database) -> Self {
        Self {
            merkle_tree: self.merkle_tree.copy_with_new_database(database.clone()),
            database,
            leaf_count: Arc::clone(&self.leaf_count),
        }
    }

    fn execute_in_transaction<T>(
        &self,
        mut f: impl FnMut(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.database
            .execute_in_transaction(TxOptions::default(), |database| {
                f(&self.copy_with_new_database(database.clone()))
            })
    }

    /// Current root
    pub fn root(&self) -> Result<Hash, StorageError> {
        self.merkle_tree.root()
    }

    /// Number of leaves that were set and not reverted
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count.load(Ordering::SeqCst)
    }

    /// Leaf at `state_id`
    pub fn leaf(&self, state_id: u32) -> Result<StateLeaf, StorageError> {
        self.find_leaf(state_id)?
            .ok_or(StorageError::NotFound("state leaf"))
    }

    /// Leaf at `state_id`, or the empty leaf if it was never set
    pub fn leaf_or_empty(&self, state_id: u32) -> Result<StateLeaf, StorageError> {
        Ok(self
            .find_leaf(state_id)?
            .unwrap_or_else(|| StateLeaf::empty(state_id)))
    }

    fn find_leaf(&self, state_id: u32) -> Result<Option<StateLeaf>, StorageError> {
        self.database.view(|txn| {
            txn.get(&state_leaf_key(state_id))?
                .map(|bytes| StateLeaf::from_bytes(state_id, &bytes))
                .transpose()
        })
    }

    /// Every stored leaf, by ascending state ID
    pub fn iter_leaves(&self) -> Result<Vec<StateLeaf>, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(STATE_LEAF_PREFIX))?;
            let mut leaves = Vec::new();
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                let state_id = decode_u32(suffix(key, STATE_LEAF_PREFIX))?;
                leaves.push(StateLeaf::from_bytes(state_id, value)?);
                cursor.next();
            }
            Ok(leaves)
        })
    }

    /// State ID right after the highest stored leaf
    pub fn next_available_state_id(&self) -> Result<u32, StorageError> {
        self.database.view(|txn| {
            let cursor = txn.cursor(CursorOptions::prefix(STATE_LEAF_PREFIX).reverse())?;
            match cursor.key() {
                Some(key) => decode_u32(suffix(key, STATE_LEAF_PREFIX))?
                    .checked_add(1)
                    .ok_or(StorageError::NoVacantSubtree(0)),
                None => Ok(0),
            }
        })
    }

    /// Store `user_state` at `state_id` and journal the change.
    ///
    /// Returns the witness of the leaf, leaf level first.
    pub fn set(&self, state_id: u32, user_state: &UserState) -> Result<Vec<Hash>, StorageError> {
        self.execute_in_transaction(|tree| tree.unsafe_set(state_id, user_state))
    }

    fn unsafe_set(&self, state_id: u32, user_state: &UserState) -> Result<Vec<Hash>, StorageError> {
        let prev_leaf = self.find_leaf(state_id)?;
        let is_insert = prev_leaf.is_none();
        let prev_root = self.root()?;

        let leaf = StateLeaf::new(state_id, user_state.clone());
        self.database
            .update(|txn| txn.upsert(&state_leaf_key(state_id), leaf.to_bytes()))?;
        let (current_root, witness) = self
            .merkle_tree
            .set_node(MerklePath::leaf(state_id), leaf.data_hash)?;

        let update = StateUpdate {
            id: 0,
            current_root,
            prev_root,
            prev_state_leaf: prev_leaf.unwrap_or_else(|| StateLeaf::empty(state_id)),
        };
        self.database.update(|txn| {
            let id = next_update_id(txn)?;
            txn.insert(&state_update_key(id), update.to_bytes())?;
            Ok::<_, StorageError>(())
        })?;

        if is_insert {
            let leaf_count = Arc::clone(&self.leaf_count);
            self.database.after_commit(Box::new(move || {
                leaf_count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        Ok(witness)
    }

    /// Undo journaled updates, newest first, until the tree root is `target_root`.
    ///
    /// Fails with [`StorageError::NonexistentState`] without touching the tree
    /// if the journal never passed through `target_root`.
    ///
    /// # Panics
    ///
    /// If the journal disagrees with the tree it describes.
    pub fn revert_to(&self, target_root: Hash) -> Result<(), StorageError> {
        self.execute_in_transaction(|tree| tree.unsafe_revert_to(target_root, |_, _| Ok(())))
    }

    /// Revert to `target_root` like [`StateTree::revert_to`], collecting the
    /// state proofs a transfer dispute needs.
    ///
    /// The first two proofs are the current receiver and sender states of
    /// the disputed transfer. Reverted updates come in sender/receiver pairs;
    /// once both updates of a pair are undone, their previous leaves are
    /// proven against the tree as it stands then.
    pub fn revert_to_for_dispute(
        &self,
        target_root: Hash,
        from_state_id: u32,
        to_state_id: u32,
    ) -> Result<Vec<StateMerkleProof>, StorageError> {
        self.execute_in_transaction(|tree| {
            let mut proofs = vec![tree.leaf_proof(to_state_id)?, tree.leaf_proof(from_state_id)?];
            let mut first_of_pair: Option<StateLeaf> = None;
            tree.unsafe_revert_to(target_root, |tree, update| {
                match first_of_pair.take() {
                    None => first_of_pair = Some(update.prev_state_leaf.clone()),
                    Some(first) => {
                        proofs.push(tree.proof_of(&first)?);
                        proofs.push(tree.proof_of(&update.prev_state_leaf)?);
                    }
                }
                Ok(())
            })?;
            Ok(proofs)
        })
    }

    /// Proof of the stored leaf at `state_id`
    pub fn leaf_proof(&self, state_id: u32) -> Result<StateMerkleProof, StorageError> {
        let leaf = self.leaf(state_id)?;
        self.proof_of(&leaf)
    }

    fn proof_of(&self, leaf: &StateLeaf) -> Result<StateMerkleProof, StorageError> {
        Ok(StateMerkleProof {
            user_state: leaf.user_state.clone(),
            witness: self.get_leaf_witness(leaf.state_id)?,
        })
    }

    /// Undo journaled updates newest first, calling `on_reverted` after each
    fn unsafe_revert_to(
        &self,
        target_root: Hash,
        mut on_reverted: impl FnMut(&Self, &StateUpdate) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut current_root = self.root()?;
        if current_root == target_root {
            return Ok(());
        }

        let updates = self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(STATE_UPDATE_PREFIX).reverse())?;
            let mut updates = Vec::new();
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                let update = StateUpdate::from_bytes(decode_u64(suffix(key, STATE_UPDATE_PREFIX))?, value)?;
                let reached = update.prev_root == target_root;
                updates.push(update);
                if reached {
                    return Ok(updates);
                }
                cursor.next();
            }
            Err(StorageError::NonexistentState)
        })?;

        tracing::info!(
            target: "state_tree",
            target_root = %hex::encode(target_root),
            updates = updates.len(),
            "Reverting state tree"
        );

        let mut removed_leaves = 0u64;
        for update in &updates {
            assert!(
                current_root == update.current_root,
                "state tree root {} does not match journaled root {} of update {}",
                hex::encode(current_root),
                hex::encode(update.current_root),
                update.id,
            );

            let prev_leaf = &update.prev_state_leaf;
            let leaf_key = state_leaf_key(prev_leaf.state_id);
            if prev_leaf.is_empty() {
                self.database.update(|txn| txn.delete(&leaf_key))?;
                removed_leaves += 1;
            } else {
                self.database
                    .update(|txn| txn.upsert(&leaf_key, prev_leaf.to_bytes()))?;
            }

            (current_root, _) = self
                .merkle_tree
                .set_node(MerklePath::leaf(prev_leaf.state_id), prev_leaf.data_hash)?;
            assert!(
                current_root == update.prev_root,
                "reverting update {} produced root {}, expected {}",
                update.id,
                hex::encode(current_root),
                hex::encode(update.prev_root),
            );

            self.database
                .update(|txn| txn.delete(&state_update_key(update.id)))?;
            on_reverted(self, update)?;
            tracing::debug!(
                target: "state_tree",
                update = update.id,
                state_id = prev_leaf.state_id,
                "Reverted state update"
            );
        }

        if removed_leaves > 0 {
            let leaf_count = Arc::clone(&self.leaf_count);
            self.database.after_commit(Box::new(move || {
                leaf_count.fetch_sub(removed_leaves, Ordering::SeqCst);
            }));
        }
        Ok(())
    }

    /// First state ID of an aligned run of `2^subtree_depth` unset leaves.
    ///
    /// The scan walks leaf keys with the cursor, so it does not conflict with
    /// concurrent writers that only add leaves elsewhere.
    pub fn next_vacant_subtree(&self, subtree_depth: u8) -> Result<u32, StorageError> {
        if subtree_depth > MAX_DEPTH {
            return Err(StorageError::NoVacantSubtree(subtree_depth));
        }
        let width = 1u64 << subtree_depth;
        let align = |index: u64| index.div_ceil(width) * width;

        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(STATE_LEAF_PREFIX))?;
            let mut next_free = 0u64;
            while let Some(key) = cursor.key() {
                let state_id = u64::from(decode_u32(suffix(key, STATE_LEAF_PREFIX))?);
                let start = align(next_free);
                if start + width <= state_id {
                    return Ok(start as u32);
                }
                next_free = state_id + 1;
                cursor.next();
            }

            let start = align(next_free);
            if start + width <= 1u64 << MAX_DEPTH {
                return Ok(start as u32);
            }
            Err(StorageError::NoVacantSubtree(subtree_depth))
        })
    }

    /// Witness of the leaf at `state_id`
    pub fn get_leaf_witness(&self, state_id: u32) -> Result<Vec<Hash>, StorageError> {
        self.merkle_tree.get_witness(MerklePath::leaf(state_id))
    }

    /// Witness of any node
    pub fn get_node_witness(&self, path: MerklePath) -> Result<Vec<Hash>, StorageError> {
        self.merkle_tree.get_witness(path)
    }
}

fn count_keys(txn: &Txn, prefix: &[u8]) -> Result<u64, StorageError> {
    let mut cursor = txn.cursor(CursorOptions::prefix(prefix))?;
    let mut count = 0;
    while cursor.valid() {
        count += 1;
        cursor.next();
    }
    Ok(count)
}

fn next_update_id(txn: &Txn) -> Result<u64, StorageError> {
    let cursor = txn.cursor(CursorOptions::prefix(STATE_UPDATE_PREFIX).reverse())?;
    match cursor.key() {
        Some(key) => Ok(decode_u64(suffix(key, STATE_UPDATE_PREFIX))? + 1),
        None => Ok(0),
    }
}
