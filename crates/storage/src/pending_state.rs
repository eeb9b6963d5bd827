//! Pending nonces and balances: the state each account reaches once every
//! mempool transaction is applied.
//!
//! Create2Transfer receivers have no state yet, so their pending funds are
//! tracked per public key instead.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use commander_db::{CursorOptions, TxOptions};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
    keys::{
        PENDING_PUBKEY_BALANCE_PREFIX, PENDING_STATE_PREFIX, decode_u32,
        pending_pubkey_balance_key, pending_state_key, suffix,
    },
    models::{PendingTx, TxBody},
    storage::Storage,
    types::{PublicKey, UserState},
};

/// Public key ID reported for a pending Create2Transfer receiver that has no
/// registered account yet.
pub const PENDING_PUB_KEY_ID: u32 = u32::MAX;

/// Nonce and balance of a state after its pending transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    /// Next nonce the state may use
    pub nonce: U256,
    /// Balance after pending debits and credits
    pub balance: U256,
}

impl PendingState {
    /// Encode the overlay entry
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.put_u256(&self.nonce);
        buf.put_u256(&self.balance);
        buf
    }

    /// Decode an overlay entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "pending state");
        let state = Self {
            nonce: reader.u256()?,
            balance: reader.u256()?,
        };
        reader.finish()?;
        Ok(state)
    }

    fn of(user_state: &UserState) -> Self {
        Self {
            nonce: user_state.nonce,
            balance: user_state.balance,
        }
    }
}

/// A user state with pending values, keyed by its state ID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUserState {
    /// State ID
    pub state_id: u32,
    /// Leaf with the pending nonce and balance
    pub user_state: UserState,
}

/// Pending state before and after [`Storage::recompute_pending_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecomputedPendingState {
    /// Overlay as it was stored
    pub old: PendingState,
    /// Overlay derived from the state leaf and the mempool
    pub new: PendingState,
}

/// State credited by a pending transaction, with the credited amount.
///
/// A transfer credits its receiver with everything the sender is debited.
pub(crate) fn receiver_credit(tx: &PendingTx) -> Result<Option<(u32, U256)>, StorageError> {
    match tx.transfer_receiver() {
        Some(receiver) => Ok(Some((receiver, tx.total()?))),
        None => Ok(None),
    }
}

/// Pending funds sent to a public key by Create2Transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyBalance {
    /// Receiving public key
    pub public_key: PublicKey,
    /// Sum of the pending credits
    pub balance: U256,
}

/// Public key credited by a pending Create2Transfer, with the credited
/// amount. Matches the transfer credit of [`receiver_credit`].
pub(crate) fn receiver_pubkey_credit(
    tx: &PendingTx,
) -> Result<Option<(PublicKey, U256)>, StorageError> {
    match tx.body {
        TxBody::Create2Transfer { to_public_key, .. } => Ok(Some((to_public_key, tx.total()?))),
        _ => Ok(None),
    }
}

fn decode_balance(bytes: &[u8]) -> Result<U256, StorageError> {
    let mut reader = Reader::new(bytes, "pending pubkey balance");
    let balance = reader.u256()?;
    reader.finish()?;
    Ok(balance)
}

fn encode_balance(balance: &U256) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.put_u256(balance);
    buf
}

impl Storage {
    /// Pending nonce and balance of `state_id`, falling back to its leaf
    pub fn get_pending_state(&self, state_id: u32) -> Result<PendingState, StorageError> {
        let stored = self.database.view(|txn| {
            txn.get(&pending_state_key(state_id))?
                .map(|bytes| PendingState::from_bytes(&bytes))
                .transpose()
        })?;
        match stored {
            Some(state) => Ok(state),
            None => Ok(PendingState::of(&self.state_tree.leaf(state_id)?.user_state)),
        }
    }

    /// Overwrite the pending state of `state_id`
    pub fn set_pending_state(&self, state_id: u32, state: PendingState) -> Result<(), StorageError> {
        self.database
            .update(|txn| txn.upsert(&pending_state_key(state_id), state.to_bytes()))?;
        Ok(())
    }

    /// Credit `amount` to the pending balance of `state_id`
    pub fn add_to_pending_balance(&self, state_id: u32, amount: U256) -> Result<(), StorageError> {
        self.execute_in_read_write_transaction(|storage| {
            let mut state = storage.get_pending_state(state_id)?;
            state.balance = state
                .balance
                .checked_add(amount)
                .ok_or(StorageError::BalanceOverflow)?;
            storage.set_pending_state(state_id, state)
        })
    }

    /// Next nonce `state_id` may use
    pub fn get_pending_nonce(&self, state_id: u32) -> Result<U256, StorageError> {
        Ok(self.get_pending_state(state_id)?.nonce)
    }

    /// Balance of `state_id` after its pending transactions
    pub fn get_pending_balance(&self, state_id: u32) -> Result<U256, StorageError> {
        Ok(self.get_pending_state(state_id)?.balance)
    }

    /// Leaf of `state_id` with its pending nonce and balance
    pub fn get_pending_user_state(&self, state_id: u32) -> Result<UserState, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            let leaf = storage.state_tree.leaf(state_id)?;
            let pending = storage.get_pending_state(state_id)?;
            Ok(UserState {
                nonce: pending.nonce,
                balance: pending.balance,
                ..leaf.user_state
            })
        })
    }

    /// Stored pending states from `start_state_id` on, at most `page_size`
    /// of them. A `page_size` of zero lists all.
    pub fn get_pending_states(
        &self,
        start_state_id: u32,
        page_size: usize,
    ) -> Result<Vec<PendingUserState>, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            let entries = storage.database.view(|txn| {
                let mut cursor = txn.cursor(CursorOptions::prefix(PENDING_STATE_PREFIX))?;
                cursor.seek(&pending_state_key(start_state_id));
                let mut entries = Vec::new();
                while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                    if page_size != 0 && entries.len() == page_size {
                        break;
                    }
                    let state_id = decode_u32(suffix(key, PENDING_STATE_PREFIX))?;
                    entries.push((state_id, PendingState::from_bytes(value)?));
                    cursor.next();
                }
                Ok::<_, StorageError>(entries)
            })?;

            entries
                .into_iter()
                .map(|(state_id, pending)| {
                    let leaf = storage.state_tree.leaf_or_empty(state_id)?;
                    Ok(PendingUserState {
                        state_id,
                        user_state: UserState {
                            nonce: pending.nonce,
                            balance: pending.balance,
                            ..leaf.user_state
                        },
                    })
                })
                .collect()
        })
    }

    /// Pending Create2Transfer funds of `public_key`, if any were sent
    pub fn get_pending_pubkey_balance(
        &self,
        public_key: &PublicKey,
    ) -> Result<Option<U256>, StorageError> {
        self.database.view(|txn| {
            txn.get(&pending_pubkey_balance_key(public_key.as_bytes()))?
                .map(|bytes| decode_balance(&bytes))
                .transpose()
        })
    }

    fn set_pending_pubkey_balance(
        &self,
        public_key: &PublicKey,
        balance: &U256,
    ) -> Result<(), StorageError> {
        self.database.update(|txn| {
            txn.upsert(
                &pending_pubkey_balance_key(public_key.as_bytes()),
                encode_balance(balance),
            )
        })?;
        Ok(())
    }

    /// Credit `amount` to the pending funds of `public_key`
    pub fn add_to_pending_pubkey_balance(
        &self,
        public_key: &PublicKey,
        amount: U256,
    ) -> Result<(), StorageError> {
        self.execute_in_read_write_transaction(|storage| {
            let balance = storage
                .get_pending_pubkey_balance(public_key)?
                .unwrap_or_default()
                .checked_add(amount)
                .ok_or(StorageError::BalanceOverflow)?;
            storage.set_pending_pubkey_balance(public_key, &balance)
        })
    }

    /// The state a pending Create2Transfer receiver would hold.
    ///
    /// Returns `None` when nothing is pending for `public_key`. The public
    /// key ID is the first registered account of the key, or
    /// [`PENDING_PUB_KEY_ID`] if it has none.
    pub fn get_pending_c2t_state(
        &self,
        public_key: &PublicKey,
    ) -> Result<Option<UserState>, StorageError> {
        self.execute_in_transaction(TxOptions::read_only(), |storage| {
            let Some(balance) = storage.get_pending_pubkey_balance(public_key)? else {
                return Ok(None);
            };
            let pub_key_id = match storage.account_tree.leaves(public_key) {
                Ok(leaves) => leaves
                    .first()
                    .map_or(PENDING_PUB_KEY_ID, |leaf| leaf.pub_key_id),
                Err(err) if err.is_not_found() => PENDING_PUB_KEY_ID,
                Err(err) => return Err(err),
            };
            Ok(Some(UserState {
                pub_key_id,
                token_id: U256::ZERO,
                balance,
                nonce: U256::ZERO,
            }))
        })
    }

    /// Stored pending public key balances from `start` on, in key order, at
    /// most `page_size` of them. A `page_size` of zero lists all.
    pub fn get_pending_pubkey_balances(
        &self,
        start: &[u8],
        page_size: usize,
    ) -> Result<Vec<PubkeyBalance>, StorageError> {
        self.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(PENDING_PUBKEY_BALANCE_PREFIX))?;
            cursor.seek(&pending_pubkey_balance_key(start));
            let mut balances = Vec::new();
            while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
                if page_size != 0 && balances.len() == page_size {
                    break;
                }
                let public_key = suffix(key, PENDING_PUBKEY_BALANCE_PREFIX)
                    .try_into()
                    .map(PublicKey)
                    .map_err(|_| StorageError::InvalidLength("pending pubkey balance key"))?;
                balances.push(PubkeyBalance {
                    public_key,
                    balance: decode_balance(value)?,
                });
                cursor.next();
            }
            Ok(balances)
        })
    }

    /// Derive the pending public key balances from the whole mempool, from
    /// `start` on and at most `page_size` of them (zero lists all). With
    /// `mutate` the derived balances replace every stored one.
    pub fn recompute_pending_pubkey_balances(
        &self,
        start: &[u8],
        page_size: usize,
        mutate: bool,
    ) -> Result<Vec<PubkeyBalance>, StorageError> {
        let options = TxOptions { read_only: !mutate };
        let balances: Vec<PubkeyBalance> = self.execute_in_transaction(options, |storage| {
            let mut derived: BTreeMap<PublicKey, U256> = BTreeMap::new();
            for tx in storage.get_all_mempool_transactions()? {
                if let Some((public_key, amount)) = receiver_pubkey_credit(&tx)? {
                    let balance = derived.entry(public_key).or_default();
                    *balance = balance
                        .checked_add(amount)
                        .ok_or(StorageError::BalanceOverflow)?;
                }
            }

            if mutate {
                for stale in storage.get_pending_pubkey_balances(&[], 0)? {
                    if !derived.contains_key(&stale.public_key) {
                        storage.database.update(|txn| {
                            txn.delete(&pending_pubkey_balance_key(stale.public_key.as_bytes()))
                        })?;
                    }
                }
                for (public_key, balance) in &derived {
                    storage.set_pending_pubkey_balance(public_key, balance)?;
                }
            }

            let page = derived
                .into_iter()
                .filter(|(public_key, _)| public_key.as_bytes().as_slice() >= start)
                .map(|(public_key, balance)| PubkeyBalance {
                    public_key,
                    balance,
                });
            Ok(if page_size == 0 {
                page.collect()
            } else {
                page.take(page_size).collect()
            })
        })?;

        tracing::info!(
            target: "mempool",
            balances = balances.len(),
            mutate,
            "Recomputed pending public key balances"
        );
        Ok(balances)
    }

    /// Derive the pending state of `state_id` from its leaf and the whole
    /// mempool. With `mutate` the result replaces the stored overlay.
    pub fn recompute_pending_state(
        &self,
        state_id: u32,
        mutate: bool,
    ) -> Result<RecomputedPendingState, StorageError> {
        let options = TxOptions { read_only: !mutate };
        let recomputed = self.execute_in_transaction(options, |storage| {
            let old = storage.get_pending_state(state_id)?;
            let leaf = storage.state_tree.leaf(state_id)?;

            let mut nonce = leaf.user_state.nonce;
            let mut credits = U256::ZERO;
            let mut debits = U256::ZERO;
            for tx in storage.get_all_mempool_transactions()? {
                if tx.from_state_id == state_id {
                    nonce += U256::from(1);
                    debits = debits
                        .checked_add(tx.total()?)
                        .ok_or(StorageError::BalanceOverflow)?;
                }
                if let Some((receiver, amount)) = receiver_credit(&tx)?
                    && receiver == state_id
                {
                    credits = credits
                        .checked_add(amount)
                        .ok_or(StorageError::BalanceOverflow)?;
                }
            }
            let balance = leaf
                .user_state
                .balance
                .checked_add(credits)
                .ok_or(StorageError::BalanceOverflow)?
                .checked_sub(debits)
                .ok_or(StorageError::BalanceTooLow)?;

            let new = PendingState { nonce, balance };
            if mutate {
                storage.set_pending_state(state_id, new)?;
            }
            Ok(RecomputedPendingState { old, new })
        })?;

        tracing::info!(
            target: "mempool",
            state_id,
            old_nonce = %recomputed.old.nonce,
            new_nonce = %recomputed.new.nonce,
            old_balance = %recomputed.old.balance,
            new_balance = %recomputed.new.balance,
            mutate,
            "Recomputed pending state"
        );
        Ok(recomputed)
    }
}
